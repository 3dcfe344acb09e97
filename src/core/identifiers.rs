//! Container identifiers and namespace identifier validation.

use crate::core::error::{StorageError, StorageResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use ulid::Ulid;

/// Opaque key naming one stored container within its (namespace, type) partition.
///
/// Allocated from a fresh ULID on every add, so an identifier is never handed
/// out twice by the same namespace, even after the original container is removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new() -> Self {
        Identifier(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(StorageError::InvalidIdentifier(format!(
                "container identifier '{}' must be a non-empty token",
                s
            )));
        }
        Ok(Identifier(s.to_string()))
    }
}

fn namespace_component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z_]+$").expect("static regex"))
}

/// Session and task identifiers are joined with `-` in backend keys, so they
/// may not contain it.
pub fn validate_namespace_component(kind: &str, value: &str) -> StorageResult<()> {
    if namespace_component_re().is_match(value) {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(format!(
            "{} identifier '{}' must match [0-9A-Za-z_]+",
            kind, value
        )))
    }
}

pub fn new_namespace_identifier() -> String {
    Ulid::new().to_string()
}
