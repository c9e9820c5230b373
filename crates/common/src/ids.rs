use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DispatchError;

/// A task identifier as it appears on the wire and in the filesystem layout
/// (`tasks/<id>/`, `results/<id>/`). Constrained to `[A-Za-z0-9_-]+` so it is
/// always safe to use as a single path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DispatchError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > 128 {
            return Err(DispatchError::Validation(format!(
                "task id must be 1-128 characters: {raw:?}"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DispatchError::Validation(format!(
                "task id contains disallowed characters: {raw:?}"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
