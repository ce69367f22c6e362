/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the one-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The channel ID does not fit the one-byte channel field.
    #[error("channel {0} out of range (max 255)")]
    ChannelOutOfRange(u16),

    /// Too many bytes were discarded without finding a well-formed frame.
    #[error("stream out of sync: discarded {discarded} bytes without a valid frame")]
    Desync { discarded: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended (or was closed) before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<sfrlink_transport::TransportError> for FrameError {
    fn from(err: sfrlink_transport::TransportError) -> Self {
        use sfrlink_transport::TransportError;
        match err {
            TransportError::Io(io) | TransportError::Connect { source: io, .. } => Self::Io(io),
            TransportError::Shutdown => Self::ConnectionClosed,
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
