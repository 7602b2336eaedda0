use std::io::Read;

use tracing::{debug, info, warn};
use twosafe_command::{CommandError, CommandMessage, CommandRegistry, Outcome};
use twosafe_transport::IpcStream;

use crate::config::ServerConfig;

/// How a single connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Peer closed without sending anything.
    Empty,
    /// Reading from the peer failed.
    Unreadable,
    /// Payload was oversized, not UTF-8, not JSON, or not an object.
    Malformed,
    /// Payload decoded but a required field was empty.
    Invalid,
    /// No handler registered for the verb.
    UnknownVerb(String),
    /// The handler ran and reported an error.
    Failed,
    /// The handler ran to completion.
    Completed(Outcome),
}

/// Failure reading one message off a connection.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("message exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one whole message: every byte until the peer closes its write side.
///
/// There is no length prefix; a connection carries exactly one message.
pub fn read_message<R: Read>(reader: R, max_message_size: usize) -> Result<Vec<u8>, ReadError> {
    let limit = u64::try_from(max_message_size.saturating_add(1)).unwrap_or(u64::MAX);
    let mut payload = Vec::new();
    reader.take(limit).read_to_end(&mut payload)?;
    if payload.len() > max_message_size {
        return Err(ReadError::TooLarge {
            max: max_message_size,
        });
    }
    Ok(payload)
}

/// Handle one accepted connection start to finish.
///
/// Reads a single message, decodes it and dispatches it through the
/// registry. Every failure is logged and ends only this connection. The
/// stream is consumed, so it is closed on every exit path; no bytes are
/// ever written back to the caller.
pub fn handle_connection(
    stream: IpcStream,
    registry: &CommandRegistry,
    config: &ServerConfig,
) -> ConnectionOutcome {
    let peer_pid = stream.peer_credentials().map(|(_, _, pid)| pid);

    if let Err(err) = stream.set_read_timeout(config.read_timeout) {
        debug!(?peer_pid, error = %err, "connection unusable");
        return ConnectionOutcome::Unreadable;
    }

    let payload = match read_message(stream, config.max_message_size) {
        Ok(payload) => payload,
        Err(ReadError::TooLarge { max }) => {
            warn!(?peer_pid, max, "message too large, dropping connection");
            return ConnectionOutcome::Malformed;
        }
        Err(ReadError::Io(err)) => {
            debug!(?peer_pid, error = %err, "connection yielded no message");
            return ConnectionOutcome::Unreadable;
        }
    };

    if payload.is_empty() {
        debug!(?peer_pid, "empty connection");
        return ConnectionOutcome::Empty;
    }
    debug!(?peer_pid, size = payload.len(), "handling incoming message");

    let message = match CommandMessage::decode(&payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(?peer_pid, error = %err, "malformed message");
            return ConnectionOutcome::Malformed;
        }
    };
    debug!(verb = %message.verb, path = %message.path, "command received");

    match registry.dispatch(&message) {
        Ok(outcome) => {
            info!(verb = %message.verb, path = %message.path, "command completed");
            ConnectionOutcome::Completed(outcome)
        }
        Err(CommandError::UnknownVerb(verb)) => {
            warn!(%verb, "unknown command");
            ConnectionOutcome::UnknownVerb(verb)
        }
        Err(err) if err.is_message_error() => {
            warn!(verb = %message.verb, error = %err, "invalid command");
            ConnectionOutcome::Invalid
        }
        Err(err) => {
            warn!(verb = %message.verb, path = %message.path, error = %err, "command failed");
            ConnectionOutcome::Failed
        }
    }
}
