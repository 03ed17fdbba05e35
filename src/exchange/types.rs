//! Exchange types: records, analysis results, resolution requests, errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::registry::EntityKind;

/// A record as carried in an archive: one JSON object.
pub type Record = serde_json::Map<String, Value>;

/// An incoming record whose natural key has no stored counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItemRecord {
    pub entity: EntityKind,
    pub key: String,
    pub payload: Record,
}

/// An incoming record whose merged content differs from what is stored.
///
/// Produced by one analysis pass and consumed by at most one resolution.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub entity: EntityKind,
    pub key: String,
    /// The stored record at analysis time.
    pub existing: Record,
    /// The incoming record overlaid on `existing`.
    pub incoming: Record,
    /// Fingerprint of `existing`, for detecting a moved store at resolve time.
    pub fingerprint: String,
}

/// Per-kind counts from one analysis pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindStats {
    /// Records with no stored counterpart.
    pub new: usize,
    /// Records identical to what is stored.
    pub unchanged: usize,
    /// Records in conflict with what is stored.
    pub conflicts: usize,
}

impl KindStats {
    /// Total records seen for this kind.
    #[must_use]
    pub fn total(&self) -> usize {
        self.new + self.unchanged + self.conflicts
    }
}

/// Result of reconciling a bundle against a store snapshot.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub new_items: Vec<NewItemRecord>,
    pub conflicts: Vec<ConflictRecord>,
    pub stats: BTreeMap<EntityKind, KindStats>,
}

impl Analysis {
    /// True when applying the bundle would change nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.new_items.is_empty() && self.conflicts.is_empty()
    }

    /// Number of records found identical to the store.
    #[must_use]
    pub fn total_unchanged(&self) -> usize {
        self.stats.values().map(|s| s.unchanged).sum()
    }
}

/// How an operator settles one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvePolicy {
    /// Leave the stored record as is.
    KeepExisting,
    /// Apply the merged candidate reported by analysis.
    Overwrite,
    /// Apply an operator-edited payload.
    Merge,
}

impl std::fmt::Display for ResolvePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepExisting => write!(f, "keep_existing"),
            Self::Overwrite => write!(f, "overwrite"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for ResolvePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep" | "keep_existing" | "keep-existing" => Ok(Self::KeepExisting),
            "overwrite" => Ok(Self::Overwrite),
            "merge" => Ok(Self::Merge),
            _ => Err(format!(
                "Unknown policy: {s} (expected keep_existing, overwrite, or merge)"
            )),
        }
    }
}

/// A single, self-contained conflict resolution.
///
/// Carries everything needed to apply it; no server-side state is consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub entity: EntityKind,
    pub key: String,
    #[serde(default)]
    pub data: Record,
    pub policy: ResolvePolicy,
    /// Fingerprint of the stored record the operator saw, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

/// An unresolved (possibly operator-edited) record to carry forward.
///
/// `entity` stays a plain string so an unknown kind surfaces as a registry
/// error instead of a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingItem {
    pub entity: String,
    pub key: String,
    #[serde(default)]
    pub data: Value,
}

/// Exchange-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The archive, its manifest, or a collection cannot be read.
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    /// The archive names an entity kind outside the registry.
    #[error("Unknown entity kind: {name}")]
    UnknownEntityKind {
        /// The unrecognized name (entity or archive entry).
        name: String,
    },

    /// A record lacks a usable natural key.
    #[error("Invalid key in {kind} record #{index}: {reason}")]
    InvalidKey {
        kind: EntityKind,
        /// Position in the collection (1-indexed).
        index: usize,
        reason: String,
    },

    /// A record carries fields its kind does not allow.
    #[error("Invalid {kind} record #{index}: {reason}")]
    InvalidRecord {
        kind: EntityKind,
        /// Position in the collection (1-indexed).
        index: usize,
        reason: String,
    },

    /// One insert of a new-items batch failed; nothing was applied.
    #[error("Batch insert failed at {kind} '{key}': {reason}")]
    BatchInsert {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    /// A single resolution violated a constraint; the store is unchanged.
    #[error("Validation failed for {kind} '{key}': {reason}")]
    Validation {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    /// Execute was asked to apply a bundle that still has conflicts.
    #[error("{count} unresolved conflict(s); resolve them individually before executing")]
    UnresolvedConflicts { count: usize },

    /// Nothing was supplied to package.
    #[error("No items to export")]
    NothingToExport,

    /// A store write hit the natural-key uniqueness constraint.
    #[error("{kind} '{key}' already exists")]
    KeyTaken { kind: EntityKind, key: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip container error while writing.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for ExchangeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type for exchange operations.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
