//! Command implementations.

pub mod completions;
pub mod exchange;
pub mod init;
pub mod status;
pub mod version;

use crate::config::{default_actor, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use std::path::PathBuf;

/// Open the configured database, which must already exist.
///
/// # Errors
///
/// Returns `NotInitialized` if no database exists at the resolved path.
pub fn open_storage(db_path: Option<&PathBuf>, actor: Option<&str>) -> Result<SqliteStorage> {
    let db_path =
        resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }

    let actor = actor.map_or_else(default_actor, str::to_string);
    Ok(SqliteStorage::open(&db_path)?.with_actor(&actor))
}
