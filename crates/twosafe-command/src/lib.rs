//! Command layer of the twosafe daemon.
//!
//! A connection delivers one [`CommandMessage`]. The [`CommandRegistry`]
//! maps its `verb` to a [`CommandHandler`] and runs it under the
//! [`PathLocks`] guard for the artifact it writes. The only built-in verb is
//! `hash`, implemented by [`HashHandler`].

pub mod error;
pub mod hash;
pub mod locks;
pub mod message;
pub mod registry;

pub use error::{CommandError, Result};
pub use hash::{
    artifact_lock_key, artifact_path, digest_file, HashHandler, ARTIFACT_SUFFIX, HASH_VERB,
};
pub use locks::{PathGuard, PathLocks};
pub use message::CommandMessage;
pub use registry::{CommandHandler, CommandRegistry, FnHandler, Outcome};
