//! Local command daemon that hashes files on request.
//!
//! A caller connects to the `2safe.sock` Unix socket in the temp directory,
//! writes one JSON object such as `{"verb":"hash","path":"/data/file"}` and
//! closes its write side. The daemon writes the lowercase hex MD5 of the file
//! to `/data/file.md5.txt`. Nothing is sent back to the caller.
//!
//! # Crate Structure
//!
//! - [`transport`]: Endpoint bind/accept/connect with stale-socket recovery
//! - [`command`]: Command messages, verb registry, hash handler
//! - [`server`]: Connection handling and server lifecycle

/// Re-export transport types.
pub mod transport {
    pub use twosafe_transport::*;
}

/// Re-export command types.
pub mod command {
    pub use twosafe_command::*;
}

/// Re-export server types.
pub mod server {
    pub use twosafe_server::*;
}
