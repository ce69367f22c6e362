//! Named register access and interrupts for a remote microcontroller.
//!
//! sfrlink carries register reads, register writes, and interrupt
//! notifications between a host and a microcontroller over one byte link,
//! using small `0xBE ... 0xEF` frames tagged with a channel number.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte links (TCP, Unix sockets, anything implementing `Link`)
//! - [`frame`]: Frame codec with resynchronization
//! - [`mux`]: Background reader and per-channel queues and callbacks
//! - [`session`]: Register map, register access, interrupt dispatch, firmware emulator

/// Re-export transport types.
pub mod transport {
    pub use sfrlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sfrlink_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use sfrlink_mux::*;
}

/// Re-export session types.
pub mod session {
    pub use sfrlink_session::*;
}
