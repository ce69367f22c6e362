use std::io::{ErrorKind, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{FrameError, Result};

/// Begin-of-frame marker.
pub const BEGIN: u8 = 0xBE;

/// End-of-frame marker.
pub const END: u8 = 0xEF;

/// Frame header: begin (1) + channel (1) + length (1) = 3 bytes.
pub const HEADER_SIZE: usize = 3;

/// Header plus the trailing end marker.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + 1;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD: usize = 0xFF;

/// Largest channel ID the one-byte channel field can describe.
pub const MAX_CHANNEL: u16 = 0xFF;

/// Default resynchronization budget before the stream is declared out of sync.
pub const DEFAULT_MAX_DISCARDED_BYTES: usize = 512;

/// A framed message with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel: u8,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (markers + header + payload).
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────┬─────────┬────────┬──────────────────┬────────┐
/// │ Begin  │ Channel │ Length │ Payload          │ End    │
/// │ 0xBE   │ (1B)    │ (1B)   │ (Length bytes)   │ 0xEF   │
/// └────────┴─────────┴────────┴──────────────────┴────────┘
/// ```
///
/// The channel is taken as `u16` so that out-of-range IDs coming from a
/// higher layer are rejected here instead of being silently truncated.
pub fn encode_frame(channel: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let channel = u8::try_from(channel).map_err(|_| FrameError::ChannelOutOfRange(channel))?;

    dst.reserve(FRAME_OVERHEAD + payload.len());
    dst.put_u8(BEGIN);
    dst.put_u8(channel);
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    dst.put_u8(END);
    Ok(())
}

/// Incremental frame scanner with resynchronization.
///
/// Bytes before a begin marker are skipped and counted. A frame whose end
/// marker is wrong is dropped whole (its length + 2 bytes are counted) and
/// scanning resumes after it. Each good frame resets the count; reaching the
/// budget yields [`FrameError::Desync`].
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    discarded: usize,
    max_discarded: usize,
}

impl FrameDecoder {
    /// Create a decoder with an explicit discard budget.
    pub fn new(max_discarded: usize) -> Self {
        Self {
            discarded: 0,
            max_discarded,
        }
    }

    /// Bytes discarded since the last good frame.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Decode the next frame from a buffer.
    ///
    /// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
    /// Skipped and dropped bytes are consumed from the buffer.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            let Some(&first) = src.first() else {
                return Ok(None);
            };

            if first != BEGIN {
                let run = src
                    .iter()
                    .position(|&byte| byte == BEGIN)
                    .unwrap_or(src.len());
                let skip = run.min(self.max_discarded.saturating_sub(self.discarded));
                src.advance(skip);
                self.count_discarded(skip)?;
                continue;
            }

            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let channel = src[1];
            let len = src[2] as usize;
            let total = HEADER_SIZE + len + 1;
            if src.len() < total {
                return Ok(None);
            }

            if src[total - 1] != END {
                trace!(
                    channel,
                    len,
                    trailer = src[total - 1],
                    "dropping frame with bad end marker"
                );
                src.advance(total);
                self.count_discarded(len + 2)?;
                continue;
            }

            src.advance(HEADER_SIZE);
            let payload = src.split_to(len).freeze();
            src.advance(1);
            self.discarded = 0;
            return Ok(Some(Frame { channel, payload }));
        }
    }

    fn count_discarded(&mut self, count: usize) -> Result<()> {
        self.discarded = self.discarded.saturating_add(count);
        if self.discarded >= self.max_discarded {
            return Err(FrameError::Desync {
                discarded: self.discarded,
            });
        }
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DISCARDED_BYTES)
    }
}

/// Read exactly one frame from a byte source, one byte at a time.
///
/// Nothing past the frame's end marker is consumed, so the source can be
/// handed to another reader afterwards.
pub fn decode_stream<R: Read>(src: &mut R, max_discarded: usize) -> Result<Frame> {
    let mut decoder = FrameDecoder::new(max_discarded);
    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + MAX_PAYLOAD);
    let mut byte = [0u8; 1];

    loop {
        if let Some(frame) = decoder.decode(&mut buf)? {
            return Ok(frame);
        }

        match src.read(&mut byte) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(_) => buf.put_u8(byte[0]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

/// Configuration for frame reading and writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Bytes the reader may discard before declaring desync. Default: 512.
    pub max_discarded_bytes: usize,
    /// Read timeout applied to the link, if any.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout applied to the link, if any.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_discarded_bytes: DEFAULT_MAX_DISCARDED_BYTES,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
