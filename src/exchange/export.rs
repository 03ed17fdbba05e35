//! Building archives from the store or from pending conflicts.

use std::collections::HashSet;

use serde_json::Value;
use tracing::info;

use crate::exchange::archive::{encode, ExchangeBundle, ExportKind, Manifest};
use crate::exchange::registry::{lookup, EntityKind, ExportScope};
use crate::exchange::store::Store;
use crate::exchange::types::{ExchangeError, ExchangeResult, PendingItem};

/// Export every record of every kind within `scope`.
///
/// Collections are built in natural-key order, so two exports of the same
/// store differ only in the manifest timestamp. A redacted export drops each
/// kind's sensitive fields.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the archive written.
pub fn export_store<S: Store>(
    store: &mut S,
    kind: ExportKind,
    scope: ExportScope,
) -> ExchangeResult<Vec<u8>> {
    let mut bundle = ExchangeBundle::new(Manifest::now(kind).with_scope(scope));

    store.read(|view| {
        for entity in EntityKind::ALL.into_iter().filter(|e| scope.includes(*e)) {
            let mut records = view.list(entity)?;
            if kind == ExportKind::Redacted {
                records = records.iter().map(|r| entity.redact(r)).collect();
            }
            if !records.is_empty() {
                bundle.collections.insert(entity, records);
            }
        }
        Ok(())
    })?;

    info!(kind = %kind, scope = %scope, records = bundle.record_count(), "Exported store");
    encode(&bundle)
}

/// Package unresolved records so the work can be picked up later.
///
/// Each item's `data` is carried as is, with key fields it omits filled in
/// from `key`, so the archive always re-imports. Records keep the order they
/// were supplied in. The manifest reads `redacted` when any record lacks one
/// of its kind's sensitive fields.
///
/// # Errors
///
/// Returns `NothingToExport` for an empty list, `UnknownEntityKind` for an
/// unregistered entity name, and `Validation` when `data` is not an object,
/// has no usable key, or repeats another item's key.
pub fn export_conflicts(items: &[PendingItem]) -> ExchangeResult<Vec<u8>> {
    if items.is_empty() {
        return Err(ExchangeError::NothingToExport);
    }

    let mut bundle = ExchangeBundle::new(Manifest::now(ExportKind::Full));
    let mut seen = HashSet::new();
    let mut redacted = false;

    for item in items {
        let kind = lookup(&item.entity)?;
        let invalid = |reason: String| ExchangeError::Validation {
            kind,
            key: item.key.clone(),
            reason,
        };

        let mut record = match &item.data {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => return Err(invalid(format!("data must be an object, got {other}"))),
        };
        kind.fill_key_fields(&item.key, &mut record);

        let key = kind.key_of(&record).map_err(invalid)?;
        if !seen.insert((kind, key.clone())) {
            return Err(invalid(format!("key '{key}' appears more than once")));
        }

        redacted |= kind
            .sensitive_fields()
            .iter()
            .any(|field| !record.contains_key(*field));
        bundle.collections.entry(kind).or_default().push(record);
    }

    if redacted {
        bundle.manifest.kind = ExportKind::Redacted;
    }
    info!(
        kind = %bundle.manifest.kind,
        records = bundle.record_count(),
        "Exported pending conflicts"
    );
    encode(&bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::archive::decode;
    use crate::exchange::store::StoreTx;
    use crate::exchange::types::Record;
    use crate::storage::SqliteStorage;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn pending(entity: &str, key: &str, data: Value) -> PendingItem {
        PendingItem {
            entity: entity.to_string(),
            key: key.to_string(),
            data,
        }
    }

    fn seeded() -> SqliteStorage {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .write("seed", |tx: &mut dyn StoreTx| {
                tx.insert(EntityKind::Tag, "zig", &obj(json!({"name": "zig"})))?;
                tx.insert(EntityKind::Tag, "ada", &obj(json!({"name": "ada"})))?;
                tx.insert(
                    EntityKind::ProviderCredential,
                    "openai:main",
                    &obj(json!({"provider": "openai", "name": "main", "apiKey": "sk-1"})),
                )
            })
            .unwrap();
        storage
    }

    #[test]
    fn test_full_export_sorted_by_key() {
        let mut storage = seeded();
        let bundle = decode(&export_store(&mut storage, ExportKind::Full, ExportScope::All).unwrap()).unwrap();

        assert_eq!(bundle.manifest.kind, ExportKind::Full);
        assert_eq!(
            bundle.collections[&EntityKind::Tag],
            vec![obj(json!({"name": "ada"})), obj(json!({"name": "zig"}))]
        );
        assert_eq!(
            bundle.collections[&EntityKind::ProviderCredential][0]["apiKey"],
            json!("sk-1")
        );
        assert!(!bundle.collections.contains_key(&EntityKind::Link));
    }

    #[test]
    fn test_redacted_export_strips_secrets() {
        let mut storage = seeded();
        let bundle = decode(&export_store(&mut storage, ExportKind::Redacted, ExportScope::All).unwrap()).unwrap();

        assert_eq!(bundle.manifest.kind, ExportKind::Redacted);
        let credential = &bundle.collections[&EntityKind::ProviderCredential][0];
        assert!(credential.get("apiKey").is_none());
        assert_eq!(credential["provider"], json!("openai"));
    }

    #[test]
    fn test_scoped_exports_split_the_store() {
        let mut storage = seeded();

        let technical =
            decode(&export_store(&mut storage, ExportKind::Full, ExportScope::Technical).unwrap())
                .unwrap();
        assert_eq!(technical.manifest.scope, ExportScope::Technical);
        assert_eq!(
            technical.collections.keys().copied().collect::<Vec<_>>(),
            vec![EntityKind::ProviderCredential]
        );

        let functional = decode(
            &export_store(&mut storage, ExportKind::Redacted, ExportScope::Functional).unwrap(),
        )
        .unwrap();
        assert_eq!(functional.manifest.kind, ExportKind::Redacted);
        assert_eq!(
            functional.collections.keys().copied().collect::<Vec<_>>(),
            vec![EntityKind::Tag]
        );
    }

    #[test]
    fn test_export_conflicts_marks_missing_secrets_redacted() {
        let with_key = export_conflicts(&[pending(
            "provider_credential",
            "openai:main",
            json!({"apiKey": "sk-2"}),
        )])
        .unwrap();
        assert_eq!(decode(&with_key).unwrap().manifest.kind, ExportKind::Full);

        let without_key = export_conflicts(&[
            pending("tag", "rust", json!({})),
            pending("provider_credential", "openai:main", json!({"baseUrl": "https://api"})),
        ])
        .unwrap();
        assert_eq!(decode(&without_key).unwrap().manifest.kind, ExportKind::Redacted);
    }

    #[test]
    fn test_export_conflicts_fills_missing_key_fields() {
        let bytes = export_conflicts(&[
            pending("link", "https://x", json!({"title": "Edited"})),
            pending("provider_credential", "openai:main", json!({"baseUrl": "https://api"})),
        ])
        .unwrap();

        let bundle = decode(&bytes).unwrap();
        assert_eq!(
            bundle.collections[&EntityKind::Link],
            vec![obj(json!({"url": "https://x", "title": "Edited"}))]
        );
        let credential = &bundle.collections[&EntityKind::ProviderCredential][0];
        assert_eq!(credential["provider"], json!("openai"));
        assert_eq!(credential["name"], json!("main"));
    }

    #[test]
    fn test_export_conflicts_accepts_legacy_entity_names() {
        let bytes = export_conflicts(&[pending("TechWatch", "2025-03-01", json!({}))]).unwrap();
        let bundle = decode(&bytes).unwrap();
        assert_eq!(
            bundle.collections[&EntityKind::CurationSession][0]["date"],
            json!("2025-03-01")
        );
    }

    #[test]
    fn test_export_conflicts_empty_list() {
        let err = export_conflicts(&[]).unwrap_err();
        assert!(matches!(err, ExchangeError::NothingToExport));
    }

    #[test]
    fn test_export_conflicts_rejects_bad_items() {
        let err = export_conflicts(&[pending("bookmark", "x", json!({}))]).unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownEntityKind { .. }));

        let err = export_conflicts(&[pending("tag", "x", json!("not an object"))]).unwrap_err();
        assert!(matches!(err, ExchangeError::Validation { .. }));

        let err = export_conflicts(&[
            pending("tag", "rust", json!({"name": "rust"})),
            pending("tag", "rust", json!({})),
        ])
        .unwrap_err();
        assert!(matches!(err, ExchangeError::Validation { .. }));
    }
}
