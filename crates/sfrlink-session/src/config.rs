use std::time::Duration;

use sfrlink_mux::MuxConfig;

/// Default time to wait for a register read reply.
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(2);

/// Controls session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a register read waits for its reply. Default: 2s.
    pub register_timeout: Duration,
    /// Multiplexer settings for the underlying link.
    pub mux: MuxConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
            mux: MuxConfig::default(),
        }
    }
}
