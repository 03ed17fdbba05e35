//! The store the engine reconciles against.
//!
//! The engine never talks to a database directly. It sees a store through
//! these traits, addressed purely by entity kind and natural key, and every
//! call it makes runs inside one store transaction:
//!
//! - [`Store::read`] for a consistent snapshot (analysis, export)
//! - [`Store::write`] for an atomic mutation (batch insert, one resolution)
//!
//! No lock is held between calls, so a result from `read` is a snapshot, not
//! a reservation. Writers re-check everything they depend on.

use crate::exchange::registry::EntityKind;
use crate::exchange::types::{ExchangeResult, Record};

/// Read access within one transaction.
pub trait StoreView {
    /// Fetch the record stored under a natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    fn get(&self, kind: EntityKind, key: &str) -> ExchangeResult<Option<Record>>;

    /// All records of one kind, in natural-key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    fn list(&self, kind: EntityKind) -> ExchangeResult<Vec<Record>>;
}

/// Write access within one transaction.
pub trait StoreTx: StoreView {
    /// Insert a record under a key that must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `KeyTaken` if the key is already used for this kind.
    fn insert(&mut self, kind: EntityKind, key: &str, record: &Record) -> ExchangeResult<()>;

    /// Replace the record stored under `key`, storing it under `new_key`.
    ///
    /// Inserts when nothing is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyTaken` if `new_key` differs from `key` and is already used
    /// by another record of this kind.
    fn replace(
        &mut self,
        kind: EntityKind,
        key: &str,
        new_key: &str,
        record: &Record,
    ) -> ExchangeResult<()>;
}

/// A transactional record store.
pub trait Store {
    /// Run `f` against a consistent snapshot.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` or from the transaction itself.
    fn read<R, F>(&mut self, f: F) -> ExchangeResult<R>
    where
        F: FnOnce(&dyn StoreView) -> ExchangeResult<R>;

    /// Run `f` in a write transaction, committing only if it succeeds.
    ///
    /// `op` names the operation for the audit trail.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` (after rolling back) or from the commit.
    fn write<R, F>(&mut self, op: &str, f: F) -> ExchangeResult<R>
    where
        F: FnOnce(&mut dyn StoreTx) -> ExchangeResult<R>;
}
