mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::{Command, Context};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "sfrlink",
    version,
    about = "Read and write microcontroller registers over a framed link"
)]
struct Cli {
    /// Device endpoint (tcp://host:port or unix:/path).
    #[arg(
        long,
        env = "SFRLINK_ENDPOINT",
        default_value = "tcp://127.0.0.1:7070",
        global = true
    )]
    endpoint: String,

    /// Register map JSON file. Default: built-in ATmega32U4 map.
    #[arg(long, env = "SFRLINK_MAP", value_name = "FILE", global = true)]
    map: Option<PathBuf>,

    /// How long a register read waits for its reply (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s", global = true)]
    timeout: String,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let ctx = Context {
        endpoint: cli.endpoint,
        map: cli.map,
        timeout: cli.timeout,
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
    };

    match cmd::run(cli.command, &ctx) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
