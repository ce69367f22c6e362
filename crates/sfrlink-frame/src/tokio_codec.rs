//! `tokio_util::codec` adapter for sfrlink frames.
//!
//! Applies the same resynchronization policy as [`crate::FrameReader`], so a
//! `Framed` stream over an async byte source behaves like the blocking one.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameConfig, FrameDecoder};
use crate::error::FrameError;

/// Async codec for sfrlink frames.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    decoder: FrameDecoder,
}

impl FrameCodec {
    /// Create a codec using the discard budget from `config`.
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.max_discarded_bytes),
        }
    }

    /// Bytes discarded since the last good frame.
    pub fn discarded(&self) -> usize {
        self.decoder.discarded()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decoder.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(u16::from(item.channel), item.payload.as_ref(), dst)
    }
}

impl<'a> Encoder<(u8, &'a [u8])> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: (u8, &'a [u8]), dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(u16::from(item.0), item.1, dst)
    }
}
