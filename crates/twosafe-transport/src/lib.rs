//! Local endpoint transport for the twosafe command server.
//!
//! Wraps a filesystem-backed Unix domain socket with the lifecycle rules the
//! daemon depends on:
//! - at most one live listener per socket path
//! - a stale socket file left by a crashed process is probed, removed, and
//!   the bind retried exactly once
//! - the socket file is removed on shutdown, but only if it is still the
//!   inode this process created
//!
//! Everything above this layer talks to connections through [`IpcStream`].

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod endpoint;

pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use endpoint::{default_endpoint_path, probe, Endpoint, EndpointState, ENDPOINT_NAME};
