use std::time::Duration;

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Frame validation or I/O error on the write path.
    #[error("frame error: {0}")]
    Frame(#[from] sfrlink_frame::FrameError),

    /// Link-level error while setting up.
    #[error("transport error: {0}")]
    Transport(#[from] sfrlink_transport::TransportError),

    /// The link was closed or ended; no further frames will arrive.
    #[error("transport closed")]
    TransportClosed,

    /// The reader gave up resynchronizing; the link is unusable.
    #[error("stream out of sync: discarded {discarded} bytes without a valid frame")]
    Desync { discarded: usize },

    /// The background reader stopped on an I/O failure.
    #[error("frame reader failed: {0}")]
    ReaderFailed(String),

    /// No payload arrived on the channel in time.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// The background reader thread could not be started.
    #[error("failed to spawn reader thread: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
