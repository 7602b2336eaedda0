use std::io::Write;
use std::path::{Path, PathBuf};

use twosafe_command::CommandMessage;
use twosafe_transport::Endpoint;

use crate::cmd::{socket_path, SendArgs};
use crate::exit::{command_error, io_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_send_receipt, OutputFormat};

/// Deliver one command. The daemon sends no reply, so success only means
/// the payload was written and the write side closed.
pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let socket = socket_path(args.socket.clone());
    let (payload, verb, path) = resolve_payload(&args)?;

    let mut stream =
        Endpoint::connect(&socket).map_err(|err| transport_error("connect failed", err))?;
    stream
        .write_all(&payload)
        .and_then(|()| stream.flush())
        .map_err(|err| io_error("send failed", err))?;
    stream
        .shutdown_write()
        .map_err(|err| transport_error("send failed", err))?;
    tracing::debug!(socket = ?socket, bytes = payload.len(), "command delivered");

    print_send_receipt(&socket, &verb, &path, payload.len(), format);
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<(Vec<u8>, String, String)> {
    if let Some(json) = &args.json {
        let message = serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))
            .and_then(|_| {
                CommandMessage::decode(json.as_bytes())
                    .map_err(|err| command_error("--json is not a command", err))
            })?;
        return Ok((json.as_bytes().to_vec(), message.verb, message.path));
    }

    let path = args
        .path
        .as_deref()
        .ok_or_else(|| CliError::new(USAGE, "--path or --json is required"))?;
    let path = absolute_path(path)?;
    let message = CommandMessage::new(args.verb.clone(), path.to_string_lossy());
    message
        .validate()
        .map_err(|err| command_error("invalid command", err))?;
    let payload = message
        .encode()
        .map_err(|err| command_error("encode failed", err))?;
    Ok((payload, message.verb, message.path))
}

/// The daemon runs with its own working directory, so relative paths are
/// resolved here.
fn absolute_path(path: &Path) -> CliResult<PathBuf> {
    std::path::absolute(path).map_err(|err| io_error("invalid --path", err))
}
