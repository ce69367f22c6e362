//! Named register access and interrupt dispatch for a remote microcontroller.
//!
//! A [`Session`] runs over two reserved channels of an `sfrlink` link:
//! register reads and writes travel on channel 0 and interrupt control and
//! notifications on channel 1. Names are resolved through a [`RegisterMap`]
//! loaded from a JSON [`RegisterMapDefinition`].
//!
//! ```no_run
//! use sfrlink_session::{RegisterMap, Session, SessionConfig};
//!
//! let link = sfrlink_transport::connect(&"tcp://127.0.0.1:7070".parse()?)?;
//! let session = Session::start(link, RegisterMap::atmega32u4()?, SessionConfig::default())?;
//! session.write_register("DDRB", 0xF0)?;
//! assert_eq!(session.read_register("DDRB")?, 0xF0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod emulator;
pub mod error;
pub mod map;
pub mod protocol;
pub mod session;

pub use config::{SessionConfig, DEFAULT_REGISTER_TIMEOUT};
pub use emulator::{Emulator, RegisterFile, SharedRegisterFile};
pub use error::{Result, SessionError};
pub use map::{
    AddressSpace, RegisterDescriptor, RegisterMap, RegisterMapDefinition, Symbol, Width,
    ATMEGA32U4, MAX_MAP_FILE_SIZE,
};
pub use session::{InterruptHandler, RegisterHandle, Session, Value};
