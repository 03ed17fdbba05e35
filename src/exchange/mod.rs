//! Data exchange between independent instances.
//!
//! A store is exported to a portable archive, and an archive is reconciled
//! against another store by natural key:
//!
//! - [`canonical`] - Order-independent structural equality and fingerprints
//! - [`registry`] - Entity kinds, natural keys, field sets
//! - [`archive`] - Zip archive codec
//! - [`reconcile`] - Classification into new items and conflicts
//! - [`resolve`] - Batch insert and single-conflict resolution
//! - [`export`] - Store and pending-conflict exports
//! - [`store`] - The transactional store the engine works against
//!
//! # Workflow
//!
//! 1. `analyze` an archive: new items, conflicts, and per-kind counts.
//! 2. `execute` applies the new items, but only when there are no conflicts.
//! 3. Each conflict is settled on its own with `resolve_one`.
//! 4. Whatever is left can be packaged again with `export_conflicts`.
//!
//! Every request is self-contained. Nothing is remembered between calls.

pub mod archive;
pub mod canonical;
pub mod export;
pub mod file;
pub mod reconcile;
pub mod registry;
pub mod resolve;
pub mod store;
pub mod types;

pub use archive::{decode, encode, ExchangeBundle, ExportKind, Manifest};
pub use registry::{lookup, EntityKind, ExportScope};
pub use resolve::ResolveOutcome;
pub use store::{Store, StoreTx, StoreView};
pub use types::{
    Analysis, ConflictRecord, ExchangeError, ExchangeResult, KindStats, NewItemRecord,
    PendingItem, Record, ResolvePolicy, ResolveRequest,
};

use tracing::info;

/// The exchange engine bound to one store.
pub struct Exchange<'a, S: Store> {
    store: &'a mut S,
}

impl<'a, S: Store> Exchange<'a, S> {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Export the store, or one scope of it, as archive bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the archive written.
    pub fn export(&mut self, kind: ExportKind, scope: ExportScope) -> ExchangeResult<Vec<u8>> {
        export::export_store(self.store, kind, scope)
    }

    /// Decode an archive and classify its records against the store.
    ///
    /// # Errors
    ///
    /// Returns `MalformedArchive`, `UnknownEntityKind`, `InvalidKey`, or
    /// `InvalidRecord`; nothing is reported in those cases.
    pub fn analyze(&mut self, archive: &[u8]) -> ExchangeResult<Analysis> {
        let bundle = decode(archive)?;
        info!(
            kind = %bundle.manifest.kind,
            exported_at = %bundle.manifest.exported_at,
            records = bundle.record_count(),
            "Decoded archive"
        );
        reconcile::analyze(&bundle, self.store)
    }

    /// Analyze an archive and insert its new items.
    ///
    /// Returns the analysis the insert was based on.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedConflicts` without writing anything when the
    /// archive has conflicts, `BatchInsert` when the insert fails, and any
    /// error `analyze` returns.
    pub fn execute(&mut self, archive: &[u8]) -> ExchangeResult<Analysis> {
        let analysis = self.analyze(archive)?;
        if !analysis.conflicts.is_empty() {
            return Err(ExchangeError::UnresolvedConflicts {
                count: analysis.conflicts.len(),
            });
        }

        resolve::apply_new(self.store, &analysis.new_items)?;
        Ok(analysis)
    }

    /// Settle one conflict.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the request cannot be applied; the store is
    /// unchanged in that case.
    pub fn resolve_one(&mut self, request: &ResolveRequest) -> ExchangeResult<ResolveOutcome> {
        resolve::resolve_one(self.store, request)
    }

    /// Package pending records as archive bytes.
    ///
    /// # Errors
    ///
    /// See [`export::export_conflicts`].
    pub fn export_conflicts(&self, items: &[PendingItem]) -> ExchangeResult<Vec<u8>> {
        export::export_conflicts(items)
    }
}
