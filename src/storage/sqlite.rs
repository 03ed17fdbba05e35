//! SQLite storage implementation.
//!
//! Implements the exchange engine's [`Store`] over a single `records` table.
//! Mutations follow the `MutationContext` protocol: one IMMEDIATE
//! transaction per operation, audit events written just before commit, and
//! rollback on any error.

use crate::error::Result;
use crate::exchange::{
    EntityKind, ExchangeError, ExchangeResult, Record, Store, StoreTx, StoreView,
};
use crate::storage::events::{insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::trace;

/// Actor recorded in the audit trail when none is configured.
pub const DEFAULT_ACTOR: &str = "tw";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    actor: String,
}

/// Context for a mutation operation, tracking side effects.
///
/// Passed to mutation closures to collect audit events, which are written
/// at the end of the transaction.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event with the payloads before and after, tagged with the operation name.
    pub fn record_change(
        &mut self,
        kind: &str,
        natural_key: &str,
        event_type: EventType,
        old_payload: Option<String>,
        new_payload: Option<String>,
    ) -> &mut Event {
        self.events.push(
            Event::new(kind, natural_key, event_type, &self.actor, &self.op_name)
                .with_payloads(old_payload, new_payload),
        );
        let last = self.events.len() - 1;
        &mut self.events[last]
    }
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self {
            conn,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Set the actor recorded on audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R, E>(&mut self, op: &str, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> std::result::Result<R, E>,
        E: From<rusqlite::Error>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, &self.actor);

        // Execute the mutation; dropping `tx` on error rolls back
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        trace!(op, events = ctx.events.len(), "Mutation committed");

        Ok(result)
    }

    /// Record counts per entity kind, in registry order.
    ///
    /// Kinds with no records are reported as zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_by_kind(&self) -> Result<Vec<(EntityKind, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM records GROUP BY kind")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts: Vec<(EntityKind, usize)> =
            EntityKind::ALL.iter().map(|kind| (*kind, 0)).collect();
        for row in rows {
            let (kind, count) = row?;
            if let Some(slot) = counts.iter_mut().find(|(k, _)| k.as_str() == kind) {
                slot.1 = usize::try_from(count).unwrap_or(0);
            }
        }

        Ok(counts)
    }
}

impl Store for SqliteStorage {
    fn read<R, F>(&mut self, f: F) -> ExchangeResult<R>
    where
        F: FnOnce(&dyn StoreView) -> ExchangeResult<R>,
    {
        // A deferred transaction pins one snapshot for every query in `f`
        let tx = self.conn.transaction()?;
        let conn: &Connection = &tx;
        let result = f(&SnapshotView { conn })?;
        tx.commit()?;
        Ok(result)
    }

    fn write<R, F>(&mut self, op: &str, f: F) -> ExchangeResult<R>
    where
        F: FnOnce(&mut dyn StoreTx) -> ExchangeResult<R>,
    {
        self.mutate(op, |tx, ctx| {
            let mut store_tx = SqliteTx { tx, ctx };
            f(&mut store_tx)
        })
    }
}

/// Read-only view over one transaction.
struct SnapshotView<'a> {
    conn: &'a Connection,
}

impl StoreView for SnapshotView<'_> {
    fn get(&self, kind: EntityKind, key: &str) -> ExchangeResult<Option<Record>> {
        get_record(self.conn, kind, key)
    }

    fn list(&self, kind: EntityKind) -> ExchangeResult<Vec<Record>> {
        list_records(self.conn, kind)
    }
}

/// Write access inside a `mutate` transaction.
struct SqliteTx<'a, 'c> {
    tx: &'a Transaction<'c>,
    ctx: &'a mut MutationContext,
}

impl StoreView for SqliteTx<'_, '_> {
    fn get(&self, kind: EntityKind, key: &str) -> ExchangeResult<Option<Record>> {
        get_record(self.tx, kind, key)
    }

    fn list(&self, kind: EntityKind) -> ExchangeResult<Vec<Record>> {
        list_records(self.tx, kind)
    }
}

impl StoreTx for SqliteTx<'_, '_> {
    fn insert(&mut self, kind: EntityKind, key: &str, record: &Record) -> ExchangeResult<()> {
        let payload = serde_json::to_string(record)?;
        let now = chrono::Utc::now().timestamp_millis();

        self.tx
            .execute(
                "INSERT INTO records (kind, natural_key, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![kind.as_str(), key, payload, now],
            )
            .map_err(|e| key_taken_or(e, kind, key))?;

        self.ctx
            .record_change(kind.as_str(), key, EventType::RecordCreated, None, Some(payload));
        Ok(())
    }

    fn replace(
        &mut self,
        kind: EntityKind,
        key: &str,
        new_key: &str,
        record: &Record,
    ) -> ExchangeResult<()> {
        let Some(old_payload) = get_payload(self.tx, kind, key)? else {
            return self.insert(kind, new_key, record);
        };

        let payload = serde_json::to_string(record)?;
        let now = chrono::Utc::now().timestamp_millis();

        self.tx
            .execute(
                "UPDATE records SET natural_key = ?1, payload = ?2, updated_at = ?3
                 WHERE kind = ?4 AND natural_key = ?5",
                rusqlite::params![new_key, payload, now, kind.as_str(), key],
            )
            .map_err(|e| key_taken_or(e, kind, new_key))?;

        let event_type = if new_key == key {
            EventType::RecordUpdated
        } else {
            EventType::RecordRekeyed
        };
        let event = self.ctx.record_change(
            kind.as_str(),
            new_key,
            event_type,
            Some(old_payload),
            Some(payload),
        );
        if event_type == EventType::RecordRekeyed {
            event.previous_key = Some(key.to_string());
        }
        Ok(())
    }
}

fn get_payload(conn: &Connection, kind: EntityKind, key: &str) -> ExchangeResult<Option<String>> {
    let payload = conn
        .query_row(
            "SELECT payload FROM records WHERE kind = ?1 AND natural_key = ?2",
            rusqlite::params![kind.as_str(), key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(payload)
}

fn get_record(conn: &Connection, kind: EntityKind, key: &str) -> ExchangeResult<Option<Record>> {
    get_payload(conn, kind, key)?
        .map(|payload| parse_payload(&payload))
        .transpose()
}

fn list_records(conn: &Connection, kind: EntityKind) -> ExchangeResult<Vec<Record>> {
    let mut stmt =
        conn.prepare("SELECT payload FROM records WHERE kind = ?1 ORDER BY natural_key")?;
    let rows = stmt.query_map([kind.as_str()], |row| row.get::<_, String>(0))?;

    rows.map(|row| {
        let payload = row?;
        parse_payload(&payload)
    })
    .collect()
}

fn parse_payload(payload: &str) -> ExchangeResult<Record> {
    Ok(serde_json::from_str(payload)?)
}

/// Map a unique-constraint failure to `KeyTaken`, anything else to `Database`.
fn key_taken_or(err: rusqlite::Error, kind: EntityKind, key: &str) -> ExchangeError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ExchangeError::KeyTaken {
                kind,
                key: key.to_string(),
            }
        }
        other => other.into(),
    }
}
