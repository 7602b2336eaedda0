use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CommandError, Result};

/// One decoded request: the whole payload of a single connection.
///
/// `verb` and `path` default to empty strings when absent. Any other fields
/// are kept in `extra` for verbs that need them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(default)]
    pub verb: String,
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandMessage {
    pub fn new(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            path: path.into(),
            extra: Map::new(),
        }
    }

    /// Decode a raw payload. Does not validate field contents.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)?;
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(CommandError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encode as the single JSON object a client writes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Reject messages with an empty verb or path.
    pub fn validate(&self) -> Result<()> {
        if self.verb.is_empty() {
            return Err(CommandError::MissingField("verb"));
        }
        if self.path.trim().is_empty() {
            return Err(CommandError::MissingField("path"));
        }
        Ok(())
    }
}
