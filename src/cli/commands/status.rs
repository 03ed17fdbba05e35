//! Status command implementation.

use crate::cli::commands::open_storage;
use crate::error::Result;
use crate::storage::events::{count_events, recent_events};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput {
    records: BTreeMap<&'static str, usize>,
    total: usize,
    events: usize,
    recent: Vec<RecentChange>,
}

#[derive(Serialize)]
struct RecentChange {
    kind: String,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_key: Option<String>,
    change: &'static str,
    op: String,
    actor: String,
    at: i64,
}

const RECENT_LIMIT: u32 = 5;

/// Execute status command.
///
/// # Errors
///
/// Returns `NotInitialized` if there is no database, or a database error.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path, None)?;
    let counts = storage.count_by_kind()?;
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    let events = count_events(storage.conn())?;
    let recent: Vec<RecentChange> = recent_events(storage.conn(), RECENT_LIMIT)?
        .into_iter()
        .map(|e| RecentChange {
            kind: e.kind,
            key: e.natural_key,
            previous_key: e.previous_key,
            change: e.event_type.as_str(),
            op: e.op,
            actor: e.actor,
            at: e.created_at,
        })
        .collect();

    if json {
        let output = StatusOutput {
            records: counts.iter().map(|(kind, n)| (kind.as_str(), *n)).collect(),
            total,
            events,
            recent,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Techwatch Status");
        println!("================");
        println!();
        for (kind, count) in &counts {
            println!("  {:<22} {count}", kind.as_str());
        }
        println!();
        println!("  Total: {total} records ({events} audit events)");
        if !recent.is_empty() {
            println!();
            println!("Recent changes:");
            for change in &recent {
                let at = chrono::DateTime::from_timestamp_millis(change.at)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let key = match &change.previous_key {
                    Some(previous) => format!("{previous} -> {}", change.key),
                    None => change.key.clone(),
                };
                println!(
                    "  {at}  {:<15} {} {key} ({} by {})",
                    change.change, change.kind, change.op, change.actor
                );
            }
        }
    }

    Ok(())
}
