use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use sfrlink_session::{RegisterMap, Session, SessionConfig};
use sfrlink_transport::{connect, ByteStream, Endpoint};

use crate::exit::{session_error, transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod emulate;
pub mod get;
pub mod isrs;
pub mod map;
pub mod set;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read registers or constants.
    Get(GetArgs),
    /// Write a register.
    Set(SetArgs),
    /// Print interrupts as the device reports them.
    Watch(WatchArgs),
    /// Print the register map.
    Map(MapArgs),
    /// Print firmware ISR stubs for every interrupt vector.
    Isrs(IsrsArgs),
    /// Serve an emulated device over TCP.
    Emulate(EmulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub endpoint: String,
    pub map: Option<PathBuf>,
    pub timeout: String,
    pub format: OutputFormat,
}

impl Context {
    /// The register map named by `--map`, or the built-in ATmega32U4 map.
    pub fn load_map(&self) -> CliResult<RegisterMap> {
        let map = match &self.map {
            Some(path) => RegisterMap::from_file(path),
            None => RegisterMap::atmega32u4(),
        };
        map.map_err(|err| session_error("map load failed", err))
    }

    pub fn connect(&self) -> CliResult<Session<ByteStream>> {
        let map = self.load_map()?;
        let endpoint: Endpoint = self
            .endpoint
            .parse()
            .map_err(|err| transport_error("bad endpoint", err))?;
        let link = connect(&endpoint).map_err(|err| transport_error("connect failed", err))?;
        let config = SessionConfig {
            register_timeout: parse_duration(&self.timeout)?,
            ..SessionConfig::default()
        };
        tracing::debug!(%endpoint, "connected");
        Session::start(link, map, config).map_err(|err| session_error("session start failed", err))
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Get(args) => get::run(args, ctx),
        Command::Set(args) => set::run(args, ctx),
        Command::Watch(args) => watch::run(args, ctx),
        Command::Map(args) => map::run(args, ctx),
        Command::Isrs(args) => isrs::run(args, ctx),
        Command::Emulate(args) => emulate::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Register, alias, or constant names.
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Register or alias name.
    pub name: String,
    /// Value to write (decimal, 0x hex, or 0b binary).
    pub value: String,
    /// Read the register back and fail if it differs.
    #[arg(long)]
    pub verify: bool,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Interrupt vector names (e.g. INT0_vect).
    #[arg(required = true)]
    pub vectors: Vec<String>,
    /// Exit after N interrupts.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct MapArgs {
    /// Only print symbols of this kind.
    #[arg(long, value_parser = ["register", "alias", "constant", "vector"])]
    pub kind: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct IsrsArgs {}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Address to listen on. Port 0 picks a free port.
    #[arg(long, default_value = "127.0.0.1:7070")]
    pub listen: String,
    /// Initial register values as NAME=VALUE (repeatable).
    #[arg(long = "preset", value_name = "NAME=VALUE")]
    pub presets: Vec<String>,
    /// Interrupt vector to fire periodically on every connection.
    #[arg(long, value_name = "VECTOR")]
    pub fire: Option<String>,
    /// Interval between fired interrupts (e.g. 500ms, 1s).
    #[arg(long, default_value = "1s", requires = "fire")]
    pub every: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `2s`, `150ms`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Parse a register value: decimal, `0x` hex, or `0b` binary, up to 16 bits.
pub fn parse_value(input: &str) -> CliResult<u16> {
    let input = input.trim().replace('_', "");
    let lower = input.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u32::from_str_radix(bin, 2)
    } else {
        lower.parse::<u32>()
    };

    let value = parsed.map_err(|_| CliError::new(USAGE, format!("invalid value: {input}")))?;
    u16::try_from(value)
        .map_err(|_| CliError::new(USAGE, format!("value {input} does not fit 16 bits")))
}

/// Route Ctrl-C to `running`.
pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Close the session, reporting a link failure seen while it was open.
pub fn finish(session: Session<ByteStream>) -> CliResult<()> {
    session
        .close()
        .map_err(|err| session_error("link failed", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_value_accepts_common_radixes() {
        assert_eq!(parse_value("240").unwrap(), 0xF0);
        assert_eq!(parse_value("0xF0").unwrap(), 0xF0);
        assert_eq!(parse_value("0b1111_0000").unwrap(), 0xF0);
        assert_eq!(parse_value("0xffff").unwrap(), u16::MAX);
    }

    #[test]
    fn parse_value_rejects_garbage_and_overflow() {
        assert_eq!(parse_value("0x10000").unwrap_err().code, USAGE);
        assert_eq!(parse_value("-1").unwrap_err().code, USAGE);
        assert_eq!(parse_value("DDRB").unwrap_err().code, USAGE);
    }

    #[test]
    fn builtin_map_loads_without_flag() {
        let ctx = Context {
            endpoint: "tcp://127.0.0.1:7070".to_string(),
            map: None,
            timeout: "2s".to_string(),
            format: OutputFormat::Json,
        };
        let map = ctx.load_map().unwrap();
        assert!(map.is_register("DDRB"));
    }

    #[test]
    fn missing_map_file_is_reported() {
        let ctx = Context {
            endpoint: "tcp://127.0.0.1:7070".to_string(),
            map: Some(PathBuf::from("/nonexistent/sfrlink-map.json")),
            timeout: "2s".to_string(),
            format: OutputFormat::Json,
        };
        assert!(ctx.load_map().is_err());
    }
}
