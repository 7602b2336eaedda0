//! Command server for the twosafe daemon.
//!
//! [`CommandServer`] owns the endpoint: it binds (recovering a stale socket
//! file once), accepts connections, hands each one to a worker thread running
//! [`handle_connection`], and on shutdown drains workers and removes the
//! socket file.
//!
//! The protocol is one-way: a caller writes one JSON object and closes its
//! write side. Nothing is ever written back.

pub mod config;
pub mod connection;
pub mod error;
pub mod server;

pub use config::ServerConfig;
pub use connection::{handle_connection, read_message, ConnectionOutcome, ReadError};
pub use error::{Result, ServerError};
pub use server::{serve, CommandServer};
