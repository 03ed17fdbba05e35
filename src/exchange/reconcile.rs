//! Reconciliation of an incoming bundle against the store.
//!
//! Each incoming record is classified by natural key:
//!
//! - no stored counterpart: a new item
//! - stored, and the overlaid record is canonically equal: unchanged, dropped
//! - stored, and the overlaid record differs: a conflict
//!
//! Analysis never writes. It reads one snapshot and reports.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::exchange::archive::ExchangeBundle;
use crate::exchange::canonical::{record_fingerprint, same_record};
use crate::exchange::store::{Store, StoreView};
use crate::exchange::types::{
    Analysis, ConflictRecord, ExchangeError, ExchangeResult, KindStats, NewItemRecord, Record,
};

/// Overlay an incoming record on a stored one.
///
/// Every field present in `incoming` replaces the stored value, `null`
/// included. Fields `incoming` omits keep their stored value, so a redacted
/// record never erases a secret.
#[must_use]
pub fn overlay(existing: &Record, incoming: &Record) -> Record {
    let mut merged = existing.clone();
    for (field, value) in incoming {
        merged.insert(field.clone(), value.clone());
    }
    merged
}

/// Classify every record of `bundle` against one snapshot of `store`.
///
/// Results follow bundle order: collections in registry order, records in
/// collection order.
///
/// # Errors
///
/// Returns `InvalidKey` if any record lacks a usable natural key or repeats
/// a key already seen in its collection, and `InvalidRecord` if any record
/// carries a field its kind does not allow. Nothing is reported in either
/// case.
pub fn analyze<S: Store>(bundle: &ExchangeBundle, store: &mut S) -> ExchangeResult<Analysis> {
    let analysis = store.read(|view| analyze_view(bundle, view))?;

    info!(
        new = analysis.new_items.len(),
        conflicts = analysis.conflicts.len(),
        unchanged = analysis.total_unchanged(),
        "Analysis complete"
    );
    Ok(analysis)
}

fn analyze_view(bundle: &ExchangeBundle, view: &dyn StoreView) -> ExchangeResult<Analysis> {
    let mut analysis = Analysis::default();

    for (&kind, records) in &bundle.collections {
        let mut seen = HashSet::with_capacity(records.len());
        let mut stats = KindStats::default();

        for (i, record) in records.iter().enumerate() {
            let key = kind.key_of(record).map_err(|reason| ExchangeError::InvalidKey {
                kind,
                index: i + 1,
                reason,
            })?;
            kind.validate_fields(record)
                .map_err(|reason| ExchangeError::InvalidRecord {
                    kind,
                    index: i + 1,
                    reason,
                })?;

            if !seen.insert(key.clone()) {
                return Err(ExchangeError::InvalidKey {
                    kind,
                    index: i + 1,
                    reason: format!("duplicate key '{key}'"),
                });
            }

            let Some(existing) = view.get(kind, &key)? else {
                stats.new += 1;
                analysis.new_items.push(NewItemRecord {
                    entity: kind,
                    key,
                    payload: record.clone(),
                });
                continue;
            };

            let merged = overlay(&existing, record);
            if same_record(&merged, &existing) {
                stats.unchanged += 1;
                continue;
            }

            debug!(kind = %kind, key = %key, "Conflict detected");
            stats.conflicts += 1;
            analysis.conflicts.push(ConflictRecord {
                entity: kind,
                fingerprint: record_fingerprint(&existing),
                key,
                existing,
                incoming: merged,
            });
        }

        debug!(
            kind = %kind,
            new = stats.new,
            unchanged = stats.unchanged,
            conflicts = stats.conflicts,
            "Analyzed collection"
        );
        analysis.stats.insert(kind, stats);
    }

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::archive::{ExportKind, Manifest};
    use crate::exchange::registry::EntityKind;
    use crate::exchange::store::StoreTx;
    use crate::storage::SqliteStorage;
    use crate::exchange::canonical::fingerprint;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn obj(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn bundle(collections: Vec<(EntityKind, Vec<Value>)>) -> ExchangeBundle {
        let mut bundle = ExchangeBundle::new(Manifest::now(ExportKind::Full));
        for (kind, records) in collections {
            bundle
                .collections
                .insert(kind, records.into_iter().map(obj).collect());
        }
        bundle
    }

    fn seed(storage: &mut SqliteStorage, kind: EntityKind, records: &[Value]) {
        storage
            .write("seed", |tx: &mut dyn StoreTx| {
                for record in records {
                    let record = obj(record.clone());
                    let key = kind.key_of(&record).unwrap();
                    tx.insert(kind, &key, &record)?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_overlay_keeps_omitted_fields() {
        let existing = obj(json!({"name": "A", "secret": "s1"}));
        let incoming = obj(json!({"name": "B"}));
        assert_eq!(
            overlay(&existing, &incoming),
            obj(json!({"name": "B", "secret": "s1"}))
        );
    }

    #[test]
    fn test_overlay_explicit_null_replaces() {
        let existing = obj(json!({"url": "https://x", "title": "Old"}));
        let incoming = obj(json!({"url": "https://x", "title": null}));
        assert_eq!(overlay(&existing, &incoming)["title"], Value::Null);
    }

    #[test]
    fn test_tag_scenario_new_and_unchanged() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        seed(&mut storage, EntityKind::Tag, &[json!({"name": "java"})]);

        let input = bundle(vec![(
            EntityKind::Tag,
            vec![json!({"name": "java"}), json!({"name": "rust"})],
        )]);
        let analysis = analyze(&input, &mut storage).unwrap();

        assert_eq!(analysis.new_items.len(), 1);
        assert_eq!(analysis.new_items[0].entity, EntityKind::Tag);
        assert_eq!(analysis.new_items[0].key, "rust");
        assert!(analysis.conflicts.is_empty());
        assert_eq!(
            analysis.stats[&EntityKind::Tag],
            KindStats {
                new: 1,
                unchanged: 1,
                conflicts: 0
            }
        );
    }

    #[test]
    fn test_link_conflict_carries_both_sides() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        seed(
            &mut storage,
            EntityKind::Link,
            &[json!({"url": "https://x", "title": "Old"})],
        );

        let input = bundle(vec![(
            EntityKind::Link,
            vec![json!({"url": "https://x", "title": "New"})],
        )]);
        let analysis = analyze(&input, &mut storage).unwrap();

        assert!(analysis.new_items.is_empty());
        assert_eq!(analysis.conflicts.len(), 1);
        let conflict = &analysis.conflicts[0];
        assert_eq!(conflict.existing["title"], json!("Old"));
        assert_eq!(conflict.incoming["title"], json!("New"));
        assert_eq!(
            conflict.fingerprint,
            fingerprint(&json!({"url": "https://x", "title": "Old"}))
        );
    }

    #[test]
    fn test_redacted_record_over_populated_secret_is_unchanged() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        seed(
            &mut storage,
            EntityKind::ProviderCredential,
            &[json!({"provider": "openai", "name": "main", "apiKey": "sk-1"})],
        );

        let input = bundle(vec![(
            EntityKind::ProviderCredential,
            vec![json!({"provider": "openai", "name": "main"})],
        )]);
        let analysis = analyze(&input, &mut storage).unwrap();
        assert!(analysis.is_noop());
        assert_eq!(analysis.total_unchanged(), 1);
    }

    #[test]
    fn test_missing_key_aborts_whole_analysis() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let input = bundle(vec![
            (EntityKind::Tag, vec![json!({"name": "rust"})]),
            (EntityKind::Link, vec![json!({"url": "https://a"}), json!({"title": "no url"})]),
        ]);

        let err = analyze(&input, &mut storage).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::InvalidKey {
                kind: EntityKind::Link,
                index: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_field_aborts_whole_analysis() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        seed(&mut storage, EntityKind::Tag, &[json!({"name": "java"})]);
        let input = bundle(vec![(
            EntityKind::Tag,
            vec![json!({"name": "rust"}), json!({"name": "java", "color": "red"})],
        )]);

        let err = analyze(&input, &mut storage).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::InvalidRecord { kind: EntityKind::Tag, index: 2, ref reason }
                if reason.contains("color")
        ));
    }

    #[test]
    fn test_credentials_with_colon_in_name_are_distinct() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let input = bundle(vec![(
            EntityKind::ProviderCredential,
            vec![
                json!({"provider": "a", "name": "b:c"}),
                json!({"provider": "a", "name": "b"}),
            ],
        )]);

        let analysis = analyze(&input, &mut storage).unwrap();
        let keys: Vec<&str> = analysis.new_items.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["a:b:c", "a:b"]);

        let ambiguous = bundle(vec![(
            EntityKind::ProviderCredential,
            vec![json!({"provider": "a:b", "name": "c"})],
        )]);
        let err = analyze(&ambiguous, &mut storage).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidKey { index: 1, .. }));
    }

    #[test]
    fn test_duplicate_key_in_collection_is_invalid() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let input = bundle(vec![(
            EntityKind::Tag,
            vec![json!({"name": "rust"}), json!({"name": " rust "})],
        )]);

        let err = analyze(&input, &mut storage).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidKey { index: 2, .. }));
    }

    #[test]
    fn test_results_follow_bundle_order() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let input = bundle(vec![
            (EntityKind::Link, vec![json!({"url": "https://b"}), json!({"url": "https://a"})]),
            (EntityKind::Tag, vec![json!({"name": "z"})]),
        ]);

        let analysis = analyze(&input, &mut storage).unwrap();
        let keys: Vec<&str> = analysis.new_items.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["z", "https://b", "https://a"]);
    }
}
