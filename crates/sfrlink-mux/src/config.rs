use sfrlink_frame::FrameConfig;

/// Default number of unread payloads kept per channel.
pub const DEFAULT_MAX_QUEUE_LEN: usize = 100;

/// Controls multiplexer behavior.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Payloads kept per channel before the oldest is dropped. Default: 100.
    pub max_queue_len: usize,
    /// Framing settings. `read_timeout` is not applied to the background
    /// reader, which blocks until data arrives or the link is closed.
    pub frame: FrameConfig,
    /// Name of the background reader thread.
    pub thread_name: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            frame: FrameConfig::default(),
            thread_name: "sfrlink-reader".to_string(),
        }
    }
}
