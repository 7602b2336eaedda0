use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{CommandError, Result};
use crate::hash::HashHandler;
use crate::locks::PathLocks;
use crate::message::CommandMessage;

/// Result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Files written or overwritten by the command.
    pub artifacts: Vec<PathBuf>,
    /// Short human-readable result, e.g. the digest.
    pub summary: String,
}

/// Executes one verb.
///
/// Handlers are stateless across invocations and touch only the filesystem
/// paths named by the message.
pub trait CommandHandler: Send + Sync {
    /// Verb this handler is registered under.
    fn verb(&self) -> &str;

    /// Path this command writes, if any. Commands with the same key never run
    /// concurrently.
    fn lock_key(&self, _message: &CommandMessage) -> Option<PathBuf> {
        None
    }

    fn execute(&self, message: &CommandMessage) -> Result<Outcome>;
}

/// Adapts a closure into a [`CommandHandler`].
pub struct FnHandler<F> {
    verb: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&CommandMessage) -> Result<Outcome> + Send + Sync,
{
    pub fn new(verb: impl Into<String>, func: F) -> Self {
        Self {
            verb: verb.into(),
            func,
        }
    }
}

impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&CommandMessage) -> Result<Outcome> + Send + Sync,
{
    fn verb(&self) -> &str {
        &self.verb
    }

    fn lock_key(&self, message: &CommandMessage) -> Option<PathBuf> {
        Some(PathBuf::from(&message.path))
    }

    fn execute(&self, message: &CommandMessage) -> Result<Outcome> {
        (self.func)(message)
    }
}

/// Verb-to-handler dispatch table.
///
/// Built once at startup and shared read-only (behind `Arc`) with every
/// connection worker.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
    locks: PathLocks,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in verbs.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(HashHandler);
        registry
    }

    /// Register a handler under its verb, replacing any previous one.
    pub fn register(&mut self, handler: impl CommandHandler + 'static) -> &mut Self {
        self.handlers
            .insert(handler.verb().to_string(), Box::new(handler));
        self
    }

    /// Registered verbs, sorted.
    pub fn verbs(&self) -> Vec<&str> {
        let mut verbs: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        verbs.sort_unstable();
        verbs
    }

    /// Validate, look up and run the handler for `message.verb`.
    ///
    /// Verb lookup is an exact, case-sensitive match. The handler runs while
    /// holding the lock for its [`CommandHandler::lock_key`].
    pub fn dispatch(&self, message: &CommandMessage) -> Result<Outcome> {
        message.validate()?;

        let handler = self
            .handlers
            .get(&message.verb)
            .ok_or_else(|| CommandError::UnknownVerb(message.verb.clone()))?;

        let _guard = handler.lock_key(message).map(|key| {
            debug!(path = ?key, "acquiring path lock");
            self.locks.lock(key)
        });
        handler.execute(message)
    }

    /// Path locks shared by all dispatches.
    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("verbs", &self.verbs())
            .finish()
    }
}
