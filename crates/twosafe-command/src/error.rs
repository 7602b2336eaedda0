use std::path::PathBuf;

/// Errors raised while decoding or executing a single command.
///
/// None of these are fatal to the server: the first group aborts one
/// connection, the second aborts one command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    /// Payload is not valid JSON or has fields of the wrong type.
    #[error("payload is not a valid command: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("payload must be a JSON object")]
    NotAnObject,

    /// A required field is absent or empty.
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    /// No handler is registered for the verb.
    #[error("unknown command: {0:?}")]
    UnknownVerb(String),

    /// The source file does not exist.
    #[error("no such file: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// The source path exists but is not a regular file.
    #[error("not a regular file: {}", path.display())]
    NotRegularFile { path: PathBuf },

    /// The source file cannot be opened for reading.
    #[error("unable to read file {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The artifact cannot be opened for writing.
    #[error("unable to write artifact {}: {source}", path.display())]
    ArtifactUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O failed after the files were opened.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CommandError {
    /// True for errors detected before any handler ran.
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            CommandError::InvalidEncoding(_)
                | CommandError::Malformed(_)
                | CommandError::NotAnObject
                | CommandError::MissingField(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
