//! Error types for agency-resolve.
//!
//! Errors are strongly typed using thiserror and split by how the pipeline
//! reacts to them:
//!
//! - [`ConfigError`] is fatal: the run aborts before anything is published.
//! - [`ValidationError`] rejects a single input value (an id, a label, a tag).
//! - [`StorageError`] comes from the record store seam.
//!
//! Per-item problems during merging (a match whose records cannot be located)
//! are not errors at all; they are reported as skip reasons in the merge
//! report. Conflicting field values are not errors either.

use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::MatchLabel;
use crate::source::SourceId;
use crate::storage::StorageError;

/// Validation errors that occur while checking a single input value.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Record id '{value}' does not match PREFIX_NNNNNN")]
    MalformedRecordId {
        value: String,
    },

    #[error("Record id prefix '{prefix}' must be uppercase ASCII letters")]
    InvalidIdPrefix {
        prefix: String,
    },

    #[error("Record id space for prefix '{prefix}' is exhausted")]
    IdSpaceExhausted {
        prefix: String,
    },

    #[error("Unknown source tag '{tag}'")]
    UnknownSource {
        tag: String,
    },

    #[error("Unknown match label '{value}' (expected \"\", \"Match\" or \"NonMatch\")")]
    UnknownLabel {
        value: String,
    },

    #[error("Score {score} is out of range [0, 100]")]
    ScoreOutOfRange {
        score: f64,
    },

    #[error("Illegal label transition from {from} to {to}")]
    IllegalLabelTransition {
        from: MatchLabel,
        to: MatchLabel,
    },

    #[error("Match pair '{source_name}' / '{target_name}' is not in the ledger")]
    UnknownPair {
        source_name: String,
        target_name: String,
    },

    #[error("Match pair must name two different records")]
    SelfPair,

    #[error("Agency name cannot be empty")]
    EmptyName,

    #[error("Invalid override: {reason}")]
    InvalidOverride {
        reason: String,
    },

    #[error("Priority order lists {actual} sources, expected {expected}")]
    PriorityLength {
        expected: usize,
        actual: usize,
    },

    #[error("Source '{missing}' is missing from the priority order")]
    PriorityMissingSource {
        missing: SourceId,
    },
}

/// Fatal configuration and input errors.
///
/// Any of these aborts the run before outputs are written.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required input file not found: {}", path.display())]
    MissingInput {
        path: PathBuf,
    },

    #[error("Table '{table}' is missing required column '{column}'")]
    MissingColumn {
        table: String,
        column: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in '{table}': {source}")]
    Csv {
        table: String,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },

    #[error("Invalid setting '{setting}': {reason}")]
    InvalidSetting {
        setting: String,
        reason: String,
    },
}

impl ConfigError {
    /// Wraps an I/O error with the path it happened on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps a CSV error with the table it happened in.
    #[must_use]
    pub fn csv(table: impl Into<String>, source: csv::Error) -> Self {
        Self::Csv {
            table: table.into(),
            source,
        }
    }

    /// Creates an invalid-setting error.
    #[must_use]
    pub fn invalid(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level error type for agency-resolve.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ResolveError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this error must abort the batch run.
    ///
    /// Validation errors are raised for single values and may be handled by
    /// the caller; everything else means the run cannot produce a complete
    /// output.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_validation()
    }
}

/// Result type alias for agency-resolve operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_malformed_id() {
        let err = ValidationError::MalformedRecordId {
            value: "REC_12".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("REC_12"));
        assert!(msg.contains("PREFIX_NNNNNN"));
    }

    #[test]
    fn test_validation_error_label_transition() {
        let err = ValidationError::IllegalLabelTransition {
            from: MatchLabel::Rejected,
            to: MatchLabel::Confirmed,
        };
        let msg = format!("{err}");
        assert_eq!(msg, "Illegal label transition from Rejected to Confirmed");
    }

    #[test]
    fn test_config_error_missing_column() {
        let err = ConfigError::MissingColumn {
            table: "ops".to_string(),
            column: "Agency Name".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("ops"));
        assert!(msg.contains("Agency Name"));
    }

    #[test]
    fn test_config_error_missing_input() {
        let err = ConfigError::MissingInput {
            path: PathBuf::from("data/ops.csv"),
        };
        assert!(err.to_string().contains("data/ops.csv"));
    }

    #[test]
    fn test_resolve_error_from_validation() {
        let err: ResolveError = ValidationError::EmptyName.into();
        assert!(err.is_validation());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_resolve_error_from_config_is_fatal() {
        let err: ResolveError = ConfigError::invalid("matcher.min_score", "must be <= 100").into();
        assert!(err.is_config());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("matcher.min_score"));
    }

    #[test]
    fn test_resolve_error_internal() {
        let err = ResolveError::internal("unexpected state");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("unexpected state"));
    }
}
