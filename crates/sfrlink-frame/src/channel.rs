//! Reserved channel IDs.
//!
//! The register/interrupt session owns channels 0 and 1. Every other
//! channel is free for application traffic.

/// Register read/write requests and their replies.
pub const REGISTER_CHANNEL: u8 = 0;

/// Interrupt enable/disable requests and firmware interrupt notifications.
pub const INTERRUPT_CHANNEL: u8 = 1;

/// Returns a human-readable name for a channel ID.
pub fn channel_name(id: u8) -> &'static str {
    match id {
        REGISTER_CHANNEL => "REGISTER",
        INTERRUPT_CHANNEL => "INTERRUPT",
        _ => "USER",
    }
}
