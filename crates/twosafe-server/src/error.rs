/// Errors that stop or disturb the server itself.
///
/// Per-connection and per-command failures never surface here; they are
/// logged by the connection handler.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or accepting on the endpoint failed.
    #[error("transport error: {0}")]
    Transport(#[from] twosafe_transport::TransportError),

    /// A worker thread could not be started; its connection was dropped.
    #[error("failed to spawn connection worker: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
