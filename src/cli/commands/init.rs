//! Initialize the techwatch database.
//!
//! Creates `~/.techwatch/data/techwatch.db` (or the `--db` path) with the
//! current schema. With `TW_TEST_DB=1` the default moves to
//! `~/.techwatch/test/techwatch.db`.

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    reinitialized: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the database exists and `force` is not
/// set, or an error if the directory or database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or_else(|| {
        Error::Config("Could not determine the techwatch directory".to_string())
    })?;

    let existed = db_path.exists();
    if existed && !force {
        return Err(Error::AlreadyInitialized { path: db_path });
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if existed {
        remove_database(&db_path)?;
    }

    // Opening applies the schema
    SqliteStorage::open(&db_path)?;
    info!(path = %db_path.display(), "Initialized database");

    if json {
        let output = InitOutput {
            database: db_path,
            reinitialized: existed,
        };
        let payload = serde_json::to_string(&output)?;
        println!("{payload}");
    } else {
        println!("Initialized techwatch database");
        println!("  Database: {}", db_path.display());
        println!();
        println!("Next: import an archive with 'tw exchange analyze <file>'.");
    }

    Ok(())
}

/// Remove a database file along with its WAL sidecars.
fn remove_database(db_path: &Path) -> Result<()> {
    fs::remove_file(db_path)?;
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            fs::remove_file(sidecar)?;
        }
    }
    Ok(())
}
