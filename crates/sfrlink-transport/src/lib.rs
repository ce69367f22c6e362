//! Duplex byte links for sfrlink.
//!
//! The framing layers above only need a blocking byte stream they can split
//! into a reader half and a writer half, and a way to force a blocked read to
//! return when the link is closed. [`Link`] captures exactly that; it is
//! implemented for TCP streams, Unix domain sockets, and the [`ByteStream`]
//! enum returned by [`connect`].
//!
//! This is the lowest layer of sfrlink. Serial ports are supplied by the
//! caller through the same trait.

pub mod endpoint;
pub mod error;
pub mod traits;

pub use endpoint::{connect, Endpoint};
pub use error::{Result, TransportError};
pub use traits::{ByteStream, Link};
