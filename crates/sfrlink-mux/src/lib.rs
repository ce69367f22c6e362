//! Channel multiplexing over a single byte link.
//!
//! A [`Mux`] owns one [`sfrlink_transport::Link`]. A dedicated thread
//! decodes frames from it and routes each one either to the callback
//! registered for its channel (run on its own thread) or to that channel's
//! bounded queue, where [`Mux::read`] picks it up. Writes from any number of
//! threads are serialized under one lock.

pub mod config;
pub mod error;
pub mod mux;
pub mod registry;

pub use config::{MuxConfig, DEFAULT_MAX_QUEUE_LEN};
pub use error::{MuxError, Result};
pub use mux::Mux;
pub use registry::{Callback, ChannelRegistry, Fault};
