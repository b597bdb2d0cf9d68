//! Error types for the signal engine.
//!
//! Every fallible engine operation returns [`EngineError`] through the
//! crate-wide [`Result`] alias. Validation happens before any mutation, so an
//! `Err` always means the engine state is unchanged.

use std::path::PathBuf;

/// Errors surfaced to callers of the engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Malformed input: empty id, out-of-range value, unknown enum member.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced intersection or emergency vehicle does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up ("intersection", "emergency vehicle", ...).
        kind: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// Registration or initialization for an id that is already present.
    #[error("{kind} already exists: {id}")]
    Duplicate {
        /// What was registered.
        kind: &'static str,
        /// The conflicting id.
        id: String,
    },

    /// Unknown signal state or coordination mode.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Multi-emergency coordination could not produce an ordering.
    #[error("unresolvable emergency conflict between {first} and {second}")]
    Conflict {
        /// First vehicle of the hard conflict.
        first: String,
        /// Second vehicle of the hard conflict.
        second: String,
    },
}

impl EngineError {
    pub(crate) fn intersection_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "intersection",
            id: id.to_string(),
        }
    }

    pub(crate) fn vehicle_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "emergency vehicle",
            id: id.to_string(),
        }
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Rejects empty or whitespace-only identifiers.
pub(crate) fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!(
            "{field} must be a non-empty string"
        )));
    }
    Ok(())
}

/// Errors that can occur when loading the engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`crate::config::EngineConfig`].
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The values parse but cannot drive the engine.
    #[error("invalid config: {0}")]
    Invalid(String),
}
