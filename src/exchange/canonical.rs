//! Canonical serialization for structural equality.
//!
//! Two JSON values canonicalize to the same string iff they are structurally
//! equal ignoring object key order at every nesting level. Arrays compare
//! positionally. The canonical form is only ever used for comparison and
//! fingerprinting, never stored.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::exchange::types::Record;

/// Nesting depth past which a value renders as `null`.
///
/// Owned `serde_json::Value` trees cannot be cyclic, so this is the terminal
/// for pathological depth instead of for self-reference. 128 matches the
/// recursion limit `serde_json` applies when parsing.
pub const MAX_DEPTH: usize = 128;

/// Render a value in canonical form.
///
/// Object keys are emitted in sorted order; scalars use their JSON encoding.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, 0, &mut out);
    out
}

/// Canonical form of a record, identical to `canonicalize` of the object.
#[must_use]
pub fn canonicalize_record(record: &Record) -> String {
    let mut out = String::new();
    write_object(record, 0, &mut out);
    out
}

/// Hex SHA-256 of the canonical form.
///
/// Lets a caller remember "the record as I saw it" without holding the record.
#[must_use]
pub fn fingerprint(value: &Value) -> String {
    sha256_hex(&canonicalize(value))
}

/// Fingerprint of a record.
#[must_use]
pub fn record_fingerprint(record: &Record) -> String {
    sha256_hex(&canonicalize_record(record))
}

/// True when both values are structurally equal.
#[must_use]
pub fn same_content(a: &Value, b: &Value) -> bool {
    canonicalize(a) == canonicalize(b)
}

/// True when both records are structurally equal.
#[must_use]
pub fn same_record(a: &Record, b: &Record) -> bool {
    canonicalize_record(a) == canonicalize_record(b)
}

fn sha256_hex(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, depth: usize, out: &mut String) {
    if depth > MAX_DEPTH {
        out.push_str("null");
        return;
    }

    match value {
        Value::Object(map) => write_object(map, depth, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, depth + 1, out);
            }
            out.push(']');
        }
        Value::String(s) => push_json_string(s, out),
        // Null, Bool and Number have a single JSON rendering
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Record, depth: usize, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, field)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_json_string(key, out);
        out.push(':');
        write_canonical(field, depth + 1, out);
    }
    out.push('}');
}

fn push_json_string(s: &str, out: &mut String) {
    // Serializing a &str into JSON cannot fail
    out.push_str(&Value::String(s.to_string()).to_string());
}
