use std::fmt;
use std::io;

use sfrlink_frame::FrameError;
use sfrlink_mux::MuxError;
use sfrlink_session::SessionError;
use sfrlink_transport::TransportError;

// sysexits-style exit codes.
pub const SUCCESS: i32 = 0;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::InvalidEndpoint(_) => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Shutdown => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::ChannelOutOfRange(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        FrameError::Desync { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Frame(err) => frame_error(context, err),
        MuxError::Transport(err) => transport_error(context, err),
        MuxError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        MuxError::Desync { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        MuxError::TransportClosed | MuxError::ReaderFailed(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        MuxError::Spawn(source) => io_error(context, source),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Mux(err) => mux_error(context, err),
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::RegisterTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::InvalidReply { .. }
        | SessionError::Definition(_)
        | SessionError::InvalidJson(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SessionError::UnknownName(_)
        | SessionError::DuplicateName(_)
        | SessionError::ConstantReadOnly(_)
        | SessionError::VectorWriteOnly(_)
        | SessionError::NotARegister(_)
        | SessionError::NotAConstant(_)
        | SessionError::NotAVector(_)
        | SessionError::ValueOutOfRange { .. }
        | SessionError::InvalidBit { .. } => CliError::new(USAGE, format!("{context}: {err}")),
    }
}
