//! Applying analysis results: the new-items batch and single resolutions.
//!
//! Nothing from an earlier analysis is trusted here. Every write re-checks
//! fields and keys against the store inside its own transaction, and the
//! store's natural-key uniqueness has the last word.

use tracing::{debug, info};

use crate::exchange::canonical::{record_fingerprint, same_record};
use crate::exchange::registry::EntityKind;
use crate::exchange::store::Store;
use crate::exchange::types::{
    ExchangeError, ExchangeResult, NewItemRecord, ResolvePolicy, ResolveRequest,
};

/// What a successful resolution did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// `KeepExisting`: nothing was touched.
    Kept,
    /// The store already held the payload.
    Unchanged,
    /// The payload was written.
    Applied,
}

impl std::fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kept => write!(f, "kept"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Applied => write!(f, "applied"),
        }
    }
}

/// Insert every new item in one transaction.
///
/// Returns the number of records inserted.
///
/// # Errors
///
/// Returns `BatchInsert` naming the first item that fails field validation,
/// whose payload key disagrees with its declared key, or whose key is
/// already taken. Nothing is inserted in that case; re-analyze before
/// retrying.
pub fn apply_new<S: Store>(store: &mut S, items: &[NewItemRecord]) -> ExchangeResult<usize> {
    if items.is_empty() {
        return Ok(0);
    }

    let inserted = store.write("exchange.apply_new", |tx| {
        for item in items {
            let kind = item.entity;
            kind.validate_fields(&item.payload)
                .map_err(|reason| batch_error(item, reason))?;

            let key = kind
                .key_of(&item.payload)
                .map_err(|reason| batch_error(item, reason))?;
            if key != item.key {
                return Err(batch_error(
                    item,
                    format!("payload key '{key}' does not match"),
                ));
            }

            tx.insert(kind, &item.key, &item.payload).map_err(|e| match e {
                ExchangeError::KeyTaken { .. } => {
                    batch_error(item, "key already exists".to_string())
                }
                other => other,
            })?;
        }
        Ok(items.len())
    })?;

    info!(inserted, "Applied new items");
    Ok(inserted)
}

/// Settle one conflict.
///
/// `Overwrite` and `Merge` both write `request.data` after validating it
/// against the entity's field set; the payload may move the record to a new
/// natural key. Writing a payload the store already holds is a no-op, so a
/// repeated request succeeds without writing.
///
/// Both write policies require `request.expected`, the fingerprint analysis
/// reported for the stored record. The write only happens if the stored
/// record still has that fingerprint, so of two concurrent resolutions of
/// the same record with different payloads, the second to commit fails.
///
/// # Errors
///
/// Returns `Validation` when `expected` is missing, when the payload has
/// unknown fields or no usable key, when its key belongs to another record,
/// or when the stored record no longer matches `expected`. The store is
/// unchanged in every error case.
pub fn resolve_one<S: Store>(
    store: &mut S,
    request: &ResolveRequest,
) -> ExchangeResult<ResolveOutcome> {
    let kind = request.entity;
    let key = request.key.as_str();

    if request.policy == ResolvePolicy::KeepExisting {
        debug!(kind = %kind, key, "Kept existing record");
        return Ok(ResolveOutcome::Kept);
    }

    let Some(expected) = request.expected.as_deref() else {
        return Err(validation(
            kind,
            key,
            format!(
                "{} requires the fingerprint reported by analysis",
                request.policy
            ),
        ));
    };

    let data = &request.data;
    kind.validate_fields(data)
        .map_err(|reason| validation(kind, key, reason))?;
    let new_key = kind
        .key_of(data)
        .map_err(|reason| validation(kind, key, reason))?;

    let op = format!("exchange.resolve.{}", request.policy);
    let outcome = store.write(&op, |tx| {
        let current = tx.get(kind, key)?;

        if current.as_ref().is_some_and(|c| same_record(c, data)) {
            return Ok(ResolveOutcome::Unchanged);
        }
        if current.is_none() && new_key != key {
            // A repeated re-key finds the record already moved
            if let Some(target) = tx.get(kind, &new_key)? {
                if same_record(&target, data) {
                    return Ok(ResolveOutcome::Unchanged);
                }
            }
        }

        let still_current = current
            .as_ref()
            .is_some_and(|c| record_fingerprint(c) == expected);
        if !still_current {
            return Err(validation(
                kind,
                key,
                "stored record changed since analysis".to_string(),
            ));
        }

        tx.replace(kind, key, &new_key, data).map_err(|e| match e {
            ExchangeError::KeyTaken { key: taken, .. } => validation(
                kind,
                key,
                format!("key '{taken}' is already used by another record"),
            ),
            other => other,
        })?;
        Ok(ResolveOutcome::Applied)
    })?;

    info!(
        kind = %kind,
        key,
        new_key = %new_key,
        policy = %request.policy,
        outcome = %outcome,
        "Resolved conflict"
    );
    Ok(outcome)
}

fn batch_error(item: &NewItemRecord, reason: String) -> ExchangeError {
    ExchangeError::BatchInsert {
        kind: item.entity,
        key: item.key.clone(),
        reason,
    }
}

fn validation(kind: EntityKind, key: &str, reason: String) -> ExchangeError {
    ExchangeError::Validation {
        kind,
        key: key.to_string(),
        reason,
    }
}
