use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the command daemon until interrupted.
    Serve(ServeArgs),
    /// Deliver one command to a running daemon.
    Send(SendArgs),
    /// Run local environment and endpoint health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind. Default: <temp dir>/2safe.sock.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
    /// Accept loop poll interval (e.g. 50ms, 1s).
    #[arg(long, default_value = "50ms")]
    pub poll_interval: String,
    /// Largest accepted message in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub max_message_size: usize,
    /// Give up on callers that send nothing for this long. Default: wait forever.
    #[arg(long)]
    pub read_timeout: Option<String>,
    /// How long shutdown waits for in-flight connections.
    #[arg(long, default_value = "2s")]
    pub shutdown_grace: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to. Default: <temp dir>/2safe.sock.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
    /// Command verb.
    #[arg(long, default_value = "hash", conflicts_with = "json")]
    pub verb: String,
    /// File argument; relative paths are resolved against the current directory.
    #[arg(long, required_unless_present = "json", conflicts_with = "json")]
    pub path: Option<PathBuf>,
    /// Raw JSON payload, sent verbatim.
    #[arg(long)]
    pub json: Option<String>,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Socket path to inspect. Default: <temp dir>/2safe.sock.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn socket_path(socket: Option<PathBuf>) -> PathBuf {
    socket.unwrap_or_else(twosafe_transport::default_endpoint_path)
}

fn parse_duration(input: &str) -> CliResult<Duration> {
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
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
