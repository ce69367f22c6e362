use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use sfrlink_transport::Link;

use crate::codec::{encode_frame, Frame, FrameConfig, FRAME_OVERHEAD, MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// Writes complete frames to any `Write` stream.
///
/// A `FrameWriter` is not synchronized; share it behind a lock so that frames
/// from concurrent senders are never interleaved.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(FRAME_OVERHEAD + MAX_PAYLOAD),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(u16::from(frame.channel), frame.payload.as_ref())
    }

    /// Encode a payload on a channel, write it, and flush.
    ///
    /// Validation happens before any byte is written, so a rejected frame
    /// leaves the stream untouched.
    pub fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(channel, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if self.should_retry(&err) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if self.should_retry(&err) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// `Interrupted` is always retried. `WouldBlock` is retried only without
    /// a write timeout; with one set it means the timeout expired.
    fn should_retry(&self, err: &std::io::Error) -> bool {
        match err.kind() {
            ErrorKind::Interrupted => true,
            ErrorKind::WouldBlock => self.config.write_timeout.is_none(),
            _ => false,
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<L: Link> FrameWriter<L> {
    /// Create a frame writer for a link and apply the write timeout from config.
    pub fn with_config_link(inner: L, config: FrameConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::FrameDecoder;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn write_exact_register_read_request() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(0, &[0x04, 0x01]).unwrap();
        assert_eq!(written(writer), vec![0xBE, 0x00, 0x02, 0x04, 0x01, 0xEF]);
    }

    #[test]
    fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(1, b"one").unwrap();
        writer.write_frame(&Frame::new(2, "two")).unwrap();

        let mut wire = BytesMut::from(written(writer).as_slice());
        let mut decoder = FrameDecoder::default();
        let f1 = decoder.decode(&mut wire).unwrap().unwrap();
        let f2 = decoder.decode(&mut wire).unwrap().unwrap();

        assert_eq!((f1.channel, f1.payload.as_ref()), (1, b"one".as_ref()));
        assert_eq!((f2.channel, f2.payload.as_ref()), (2, b"two".as_ref()));
    }

    #[test]
    fn rejected_frames_write_nothing() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let err = writer.send(1, &[0u8; 300]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        let err = writer.send(999, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ChannelOutOfRange(999)));

        assert!(written(writer).is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(1, b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_and_would_block() {
        let mut writer = FrameWriter::new(FlakyWriter {
            failures: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            data: Vec::new(),
        });
        writer.send(5, b"retry").unwrap();

        assert_eq!(writer.get_ref().data.len(), FRAME_OVERHEAD + 5);
    }

    #[test]
    fn would_block_fails_once_a_write_timeout_is_set() {
        let config = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(
            FlakyWriter {
                failures: vec![ErrorKind::WouldBlock],
                data: Vec::new(),
            },
            config,
        );

        let err = writer.send(5, b"stuck").unwrap_err();
        assert!(matches!(err, FrameError::Io(ref e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn write_timeout_fires_when_peer_stops_reading() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let config = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config_link(left, config).unwrap();

        let payload = [0x55u8; MAX_PAYLOAD];
        let err = (0..100_000)
            .find_map(|_| writer.send(5, &payload).err())
            .expect("socket buffer should fill");
        assert!(matches!(
            err,
            FrameError::Io(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        ));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn closed_link_reports_io_error() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(right);
        let mut writer = FrameWriter::with_config_link(left, FrameConfig::default()).unwrap();

        let err = writer.send(0, b"x").unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlakyWriter {
        failures: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.failures.pop() {
                return Err(std::io::Error::from(kind));
            }
            // Accept at most two bytes per call to exercise partial writes.
            let n = buf.len().min(2);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
