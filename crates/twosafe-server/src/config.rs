use std::time::Duration;

/// Tunables for the accept loop and connection handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// How long the accept loop sleeps when no connection is pending. Bounds
    /// how quickly a shutdown request is observed.
    pub poll_interval: Duration,
    /// Largest accepted message; bigger payloads are discarded as malformed.
    pub max_message_size: usize,
    /// Read timeout per connection. `None` waits indefinitely for the caller.
    pub read_timeout: Option<Duration>,
    /// How long shutdown waits for in-flight connections before cutting off
    /// the ones still reading.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            max_message_size: 64 * 1024,
            read_timeout: None,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
