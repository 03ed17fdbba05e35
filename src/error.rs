//! Error types for the techwatch CLI.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 4=validation, 6=exchange, etc.)
//! - Retryability flags for scripted callers
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::exchange::{EntityKind, ExchangeError};

/// Result type alias for techwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Validation (exit 4)
    InvalidArgument,

    // Exchange (exit 6)
    MalformedArchive,
    InvalidKey,
    InvalidRecord,
    BatchInsertFailed,
    ValidationFailed,
    UnresolvedConflicts,
    NothingToExport,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::MalformedArchive => "MALFORMED_ARCHIVE",
            Self::InvalidKey => "INVALID_KEY",
            Self::InvalidRecord => "INVALID_RECORD",
            Self::BatchInsertFailed => "BATCH_INSERT_FAILED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::UnresolvedConflicts => "UNRESOLVED_CONFLICTS",
            Self::NothingToExport => "NOTHING_TO_EXPORT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::InvalidArgument => 4,
            Self::MalformedArchive
            | Self::InvalidKey
            | Self::InvalidRecord
            | Self::BatchInsertFailed
            | Self::ValidationFailed
            | Self::UnresolvedConflicts
            | Self::NothingToExport => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the caller should retry with corrected input.
    ///
    /// True for a rejected resolution (edit and retry), a failed batch
    /// (re-analyze and retry), bad arguments, and a busy database.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::BatchInsertFailed
                | Self::ValidationFailed
                | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in techwatch CLI operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `tw init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Exchange(#[from] ExchangeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Exchange(e) => exchange_code(e),
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `tw init` to initialize the database".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::Exchange(e) => exchange_hint(e),

            Self::InvalidArgument(msg) => {
                if msg.contains("policy") {
                    Some("Valid policies: keep_existing, overwrite, merge".to_string())
                } else if msg.contains("entity") {
                    Some(format!("Valid entities: {}", entity_names()))
                } else {
                    None
                }
            }

            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Config(_) | Self::Other(_) => {
                None
            }
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint. Scripts parse this instead of stderr text.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

const fn exchange_code(err: &ExchangeError) -> ErrorCode {
    match err {
        // An unknown entry rejects the archive as a whole
        ExchangeError::MalformedArchive(_) | ExchangeError::UnknownEntityKind { .. } => {
            ErrorCode::MalformedArchive
        }
        ExchangeError::InvalidKey { .. } => ErrorCode::InvalidKey,
        ExchangeError::InvalidRecord { .. } => ErrorCode::InvalidRecord,
        ExchangeError::BatchInsert { .. } => ErrorCode::BatchInsertFailed,
        ExchangeError::Validation { .. } | ExchangeError::KeyTaken { .. } => {
            ErrorCode::ValidationFailed
        }
        ExchangeError::UnresolvedConflicts { .. } => ErrorCode::UnresolvedConflicts,
        ExchangeError::NothingToExport => ErrorCode::NothingToExport,
        ExchangeError::Io(_) | ExchangeError::Zip(_) => ErrorCode::IoError,
        ExchangeError::Json(_) => ErrorCode::JsonError,
        ExchangeError::Database(_) => ErrorCode::DatabaseError,
    }
}

fn exchange_hint(err: &ExchangeError) -> Option<String> {
    match err {
        ExchangeError::MalformedArchive(_) => Some(
            "Expected a zip archive with manifest.json, as written by `tw exchange export`"
                .to_string(),
        ),
        ExchangeError::UnknownEntityKind { .. } => Some(format!(
            "Valid entities: {}. Archive entries: {}",
            entity_names(),
            EntityKind::ALL
                .iter()
                .map(EntityKind::file_name)
                .collect::<Vec<_>>()
                .join(", ")
        )),
        ExchangeError::InvalidKey { kind, .. } => match kind.key_fields() {
            [field] => Some(format!("Every {kind} record needs a non-empty, unique {field}")),
            [leading @ .., last] => Some(format!(
                "Every {kind} record needs a non-empty, unique {} and {last}; {} must not contain ':'",
                leading.join(", "),
                leading.join(", ")
            )),
            [] => None,
        },
        ExchangeError::InvalidRecord { kind, .. } => Some(format!(
            "{kind} records may only carry: {}. Fix the archive and analyze again.",
            kind.fields().join(", ")
        )),
        ExchangeError::BatchInsert { .. } => Some(
            "The store changed since analysis. Re-run `tw exchange analyze` and retry."
                .to_string(),
        ),
        ExchangeError::Validation { .. } | ExchangeError::KeyTaken { .. } => Some(
            "Edit the payload and retry, or keep the stored record with `--policy keep`"
                .to_string(),
        ),
        ExchangeError::UnresolvedConflicts { .. } => Some(
            "Settle each conflict with `tw exchange resolve`, or save them for later with \
             `tw exchange export-conflicts`"
                .to_string(),
        ),
        ExchangeError::NothingToExport => {
            Some("Pass at least one item in the --input file".to_string())
        }
        ExchangeError::Io(_)
        | ExchangeError::Json(_)
        | ExchangeError::Zip(_)
        | ExchangeError::Database(_) => None,
    }
}

fn entity_names() -> String {
    EntityKind::ALL
        .iter()
        .map(EntityKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_errors_exit_six() {
        let errors = [
            Error::from(ExchangeError::MalformedArchive("bad".to_string())),
            Error::from(ExchangeError::UnresolvedConflicts { count: 2 }),
            Error::from(ExchangeError::Validation {
                kind: EntityKind::Tag,
                key: "rust".to_string(),
                reason: "taken".to_string(),
            }),
        ];
        for err in &errors {
            assert_eq!(err.exit_code(), 6);
        }
    }

    #[test]
    fn test_unknown_entity_reported_as_malformed() {
        let err = Error::from(ExchangeError::UnknownEntityKind {
            name: "bookmarks.json".to_string(),
        });
        assert_eq!(err.error_code(), ErrorCode::MalformedArchive);
        assert!(err.hint().unwrap().contains("links.json"));
    }

    #[test]
    fn test_structured_json_shape() {
        let err = Error::from(ExchangeError::BatchInsert {
            kind: EntityKind::Link,
            key: "https://x".to_string(),
            reason: "key already exists".to_string(),
        });
        let json = err.to_structured_json();

        assert_eq!(json["error"]["code"], "BATCH_INSERT_FAILED");
        assert_eq!(json["error"]["retryable"], true);
        assert_eq!(json["error"]["exit_code"], 6);
        assert!(json["error"]["hint"].as_str().unwrap().contains("analyze"));
    }

    #[test]
    fn test_invalid_record_hint_lists_fields() {
        let err = Error::from(ExchangeError::InvalidRecord {
            kind: EntityKind::Tag,
            index: 1,
            reason: "unknown field(s) for tag: color (allowed: name)".to_string(),
        });
        assert_eq!(err.error_code(), ErrorCode::InvalidRecord);
        assert_eq!(err.exit_code(), 6);
        assert!(!err.error_code().is_retryable());
        assert!(err.hint().unwrap().contains("name"));
    }

    #[test]
    fn test_not_initialized_hint() {
        let err = Error::NotInitialized;
        assert_eq!(err.exit_code(), 2);
        assert!(err.hint().unwrap().contains("tw init"));
    }
}
