//! Audit trail of record changes.
//!
//! Every write the exchange engine makes leaves one row with the payload
//! before and after, the operation that made it, and who ran it. Rows are
//! append-only.

use rusqlite::{Connection, Result, Row};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Inserted under a key that was free.
    RecordCreated,
    /// Payload replaced under the same key.
    RecordUpdated,
    /// Payload replaced and moved to a new key.
    RecordRekeyed,
}

impl EventType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecordCreated => "record_created",
            Self::RecordUpdated => "record_updated",
            Self::RecordRekeyed => "record_rekeyed",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "record_created" => Ok(Self::RecordCreated),
            "record_updated" => Ok(Self::RecordUpdated),
            "record_rekeyed" => Ok(Self::RecordRekeyed),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// One audited change.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    /// Entity kind wire name.
    pub kind: String,
    /// Natural key after the change.
    pub natural_key: String,
    /// Natural key before a re-key; `None` for every other change.
    pub previous_key: Option<String>,
    pub event_type: EventType,
    pub actor: String,
    /// Operation that made the change, e.g. `exchange.apply_new`.
    pub op: String,
    pub old_payload: Option<String>,
    pub new_payload: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl Event {
    /// A change made now (id is assigned on insert).
    #[must_use]
    pub fn new(kind: &str, natural_key: &str, event_type: EventType, actor: &str, op: &str) -> Self {
        Self {
            id: 0,
            kind: kind.to_string(),
            natural_key: natural_key.to_string(),
            previous_key: None,
            event_type,
            actor: actor.to_string(),
            op: op.to_string(),
            old_payload: None,
            new_payload: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Attach the payloads before and after the change.
    #[must_use]
    pub fn with_payloads(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_payload = old;
        self.new_payload = new;
        self
    }
}

const EVENT_COLUMNS: &str = "id, kind, natural_key, previous_key, event_type, actor, op, \
                             old_payload, new_payload, created_at";

/// Insert an event into the database.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (kind, natural_key, previous_key, event_type, actor, op,
                             old_payload, new_payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            event.kind,
            event.natural_key,
            event.previous_key,
            event.event_type.as_str(),
            event.actor,
            event.op,
            event.old_payload,
            event.new_payload,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// History of one record, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_events(
    conn: &Connection,
    kind: &str,
    natural_key: &str,
    limit: Option<u32>,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE kind = ?1 AND natural_key = ?2
         ORDER BY created_at DESC, id DESC
         LIMIT ?3"
    ))?;

    let rows = stmt.query_map(
        rusqlite::params![kind, natural_key, limit.unwrap_or(100)],
        map_event,
    )?;
    rows.collect()
}

/// Latest changes across all records, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn recent_events(conn: &Connection, limit: u32) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events ORDER BY created_at DESC, id DESC LIMIT ?1"
    ))?;

    let rows = stmt.query_map([limit], map_event)?;
    rows.collect()
}

/// Total number of events recorded.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_events(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn map_event(row: &Row<'_>) -> Result<Event> {
    let event_type: String = row.get(4)?;
    Ok(Event {
        id: row.get(0)?,
        kind: row.get(1)?,
        natural_key: row.get(2)?,
        previous_key: row.get(3)?,
        event_type: event_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        actor: row.get(5)?,
        op: row.get(6)?,
        old_payload: row.get(7)?,
        new_payload: row.get(8)?,
        created_at: row.get(9)?,
    })
}
