//! Archive codec.
//!
//! An exchange archive is a zip container holding:
//!
//! - `manifest.json`: `{"kind": "full"|"redacted", "scope": "all"|"technical"|"functional",
//!   "exportedAt": "...", "format": 1}`
//! - one JSON array per populated entity kind (`links.json`, `tags.json`, ...)
//!
//! Empty kinds are omitted. Any other entry, or an entry outside the
//! manifest's scope, rejects the whole archive.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::exchange::registry::{EntityKind, ExportScope};
use crate::exchange::types::{ExchangeError, ExchangeResult, Record};

/// Name of the manifest entry.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Archive format version written by this build and the only one accepted.
pub const FORMAT_VERSION: u32 = 1;

/// Whether an export carries sensitive fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    /// Every field of every record.
    #[default]
    Full,
    /// Sensitive fields removed.
    Redacted,
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Redacted => write!(f, "redacted"),
        }
    }
}

/// Archive manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub kind: ExportKind,
    /// Archives written before scopes existed read as `all`.
    #[serde(default)]
    pub scope: ExportScope,
    /// RFC 3339 timestamp of the export.
    pub exported_at: String,
    #[serde(default = "default_format")]
    pub format: u32,
}

const fn default_format() -> u32 {
    FORMAT_VERSION
}

impl Manifest {
    /// Manifest stamped with the current time, covering every kind.
    #[must_use]
    pub fn now(kind: ExportKind) -> Self {
        Self {
            kind,
            scope: ExportScope::All,
            exported_at: chrono::Utc::now().to_rfc3339(),
            format: FORMAT_VERSION,
        }
    }

    /// Narrow the manifest to one scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ExportScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Decoded archive contents.
///
/// Collections iterate in registry order; records keep their archive order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeBundle {
    pub manifest: Manifest,
    pub collections: BTreeMap<EntityKind, Vec<Record>>,
}

impl ExchangeBundle {
    /// Empty bundle with the given manifest.
    #[must_use]
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            collections: BTreeMap::new(),
        }
    }

    /// Total number of records across all collections.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

/// Decode archive bytes into a bundle.
///
/// # Errors
///
/// Returns `MalformedArchive` when the container cannot be opened or the
/// manifest is missing or unparsable. Also returned when a collection is not
/// a list of objects or falls outside the manifest's scope.
/// Returns `UnknownEntityKind` for an unrecognized entry.
pub fn decode(bytes: &[u8]) -> ExchangeResult<ExchangeBundle> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExchangeError::MalformedArchive(format!("cannot open archive: {e}")))?;

    let mut manifest = None;
    let mut collections = BTreeMap::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExchangeError::MalformedArchive(format!("unreadable entry #{i}: {e}")))?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| ExchangeError::MalformedArchive(format!("cannot read {name}: {e}")))?;

        if name == MANIFEST_ENTRY {
            if manifest.is_some() {
                return Err(ExchangeError::MalformedArchive(format!(
                    "duplicate {MANIFEST_ENTRY}"
                )));
            }
            manifest = Some(parse_manifest(&data)?);
            continue;
        }

        let kind = EntityKind::from_file_name(&name)
            .ok_or_else(|| ExchangeError::UnknownEntityKind { name: name.clone() })?;
        if collections.contains_key(&kind) {
            return Err(ExchangeError::MalformedArchive(format!("duplicate entry {name}")));
        }

        let records = parse_collection(&name, &data)?;
        debug!(kind = %kind, records = records.len(), "Decoded collection");
        if !records.is_empty() {
            collections.insert(kind, records);
        }
    }

    let manifest: Manifest = manifest
        .ok_or_else(|| ExchangeError::MalformedArchive(format!("missing {MANIFEST_ENTRY}")))?;

    if let Some(kind) = collections.keys().find(|k| !manifest.scope.includes(**k)) {
        return Err(ExchangeError::MalformedArchive(format!(
            "{} is outside the archive's {} scope",
            kind.file_name(),
            manifest.scope
        )));
    }

    Ok(ExchangeBundle {
        manifest,
        collections,
    })
}

/// Encode a bundle as archive bytes.
///
/// The manifest is written first, then each non-empty collection in registry
/// order. Entry timestamps are fixed, so equal bundles encode to equal bytes.
///
/// # Errors
///
/// Returns an error if serialization or the zip writer fails.
pub fn encode(bundle: &ExchangeBundle) -> ExchangeResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&bundle.manifest)?)?;

    for (kind, records) in &bundle.collections {
        if records.is_empty() {
            continue;
        }
        zip.start_file(kind.file_name(), options)?;
        zip.write_all(&serde_json::to_vec_pretty(records)?)?;
    }

    let finished = zip.finish()?;
    Ok(finished.into_inner())
}

fn parse_manifest(data: &[u8]) -> ExchangeResult<Manifest> {
    let manifest: Manifest = serde_json::from_slice(data).map_err(|e| {
        ExchangeError::MalformedArchive(format!("unparsable {MANIFEST_ENTRY}: {e}"))
    })?;

    if manifest.format != FORMAT_VERSION {
        return Err(ExchangeError::MalformedArchive(format!(
            "unsupported archive format {} (expected {FORMAT_VERSION})",
            manifest.format
        )));
    }

    Ok(manifest)
}

fn parse_collection(name: &str, data: &[u8]) -> ExchangeResult<Vec<Record>> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| ExchangeError::MalformedArchive(format!("invalid JSON in {name}: {e}")))?;

    let Value::Array(items) = value else {
        return Err(ExchangeError::MalformedArchive(format!(
            "{name} is not a list"
        )));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(record) => Ok(record),
            other => Err(ExchangeError::MalformedArchive(format!(
                "{name} item #{} is not an object: {other}",
                i + 1
            ))),
        })
        .collect()
}
