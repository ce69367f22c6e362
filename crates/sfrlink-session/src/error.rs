use std::time::Duration;

/// Errors that can occur in register and interrupt operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying link failed or was closed.
    #[error("link error: {0}")]
    Mux(#[from] sfrlink_mux::MuxError),

    /// Frame-level failure outside a running multiplexer (emulator side).
    #[error("frame error: {0}")]
    Frame(#[from] sfrlink_frame::FrameError),

    /// No symbol with this name exists.
    #[error("unknown name: {0}")]
    UnknownName(String),

    /// The name is already taken by a register or vector.
    #[error("name already defined: {0}")]
    DuplicateName(String),

    /// The firmware did not answer a register read in time.
    #[error("no reply reading {name} within {timeout:?}")]
    RegisterTimeout { name: String, timeout: Duration },

    #[error("{0} is a constant and cannot be written")]
    ConstantReadOnly(String),

    #[error("{0} is an interrupt vector and cannot be read")]
    VectorWriteOnly(String),

    #[error("{0} is not a register")]
    NotARegister(String),

    #[error("{0} is not a constant")]
    NotAConstant(String),

    #[error("{0} is not an interrupt vector")]
    NotAVector(String),

    /// The value does not fit the register width.
    #[error("value {value:#x} does not fit {name} (max {max:#x})")]
    ValueOutOfRange { name: String, value: u32, max: u16 },

    /// The bit index is past the register width.
    #[error("bit {bit} is outside {width}-bit register {name}")]
    InvalidBit { name: String, bit: u8, width: u8 },

    /// The register reply had an unexpected length.
    #[error("invalid register reply ({len} bytes)")]
    InvalidReply { len: usize },

    /// A register map definition could not be loaded.
    #[error("invalid register map: {0}")]
    Definition(String),

    /// A register map document is not valid JSON.
    #[error("register map is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
