//! BEGIN/END delimited framing with one-byte channel multiplexing.
//!
//! Every message on the wire is framed as:
//! - `0xBE` begin marker
//! - a 1-byte channel ID
//! - a 1-byte payload length (at most 255)
//! - the payload
//! - `0xEF` end marker
//!
//! There is no checksum. A frame whose end marker is missing is discarded
//! and the reader rescans for the next begin marker; a stream that keeps
//! producing garbage is declared out of sync after a bounded number of
//! discarded bytes.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use channel::{channel_name, INTERRUPT_CHANNEL, REGISTER_CHANNEL};
pub use codec::{
    decode_stream, encode_frame, Frame, FrameConfig, FrameDecoder, BEGIN,
    DEFAULT_MAX_DISCARDED_BYTES, END, FRAME_OVERHEAD, HEADER_SIZE, MAX_CHANNEL, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
