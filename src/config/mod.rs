//! Configuration management.
//!
//! Resolves where the database lives and who is acting.
//!
//! # Layout
//!
//! Everything local to one installation sits under `~/.techwatch/`:
//! - **Database**: `~/.techwatch/data/techwatch.db`
//! - **Test database**: `~/.techwatch/test/techwatch.db` (with `TW_TEST_DB=1`)
//!
//! Archives are written wherever the operator points `-o`, defaulting to the
//! current directory.

use std::path::{Path, PathBuf};

/// File name of the database inside its data directory.
pub const DB_FILE_NAME: &str = "techwatch.db";

/// Get the global techwatch directory location (`~/.techwatch/`).
#[must_use]
pub fn global_techwatch_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".techwatch"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `TW_TEST_DB=1` (or any non-empty value).
/// This redirects all database operations to an isolated test database.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("TW_TEST_DB").is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Get the test database path.
///
/// Returns `~/.techwatch/test/techwatch.db` for isolated testing.
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_techwatch_dir().map(|dir| dir.join("test").join(DB_FILE_NAME))
}

/// Default database path, respecting test mode.
#[must_use]
pub fn default_db_path() -> Option<PathBuf> {
    if is_test_mode() {
        return test_db_path();
    }
    global_techwatch_dir().map(|dir| dir.join("data").join(DB_FILE_NAME))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `TW_TEST_DB` environment variable → uses test database
/// 3. `TW_DB` environment variable
/// 4. Global location: `~/.techwatch/data/techwatch.db`
///
/// The CLI's `--db` flag also reads `TW_DB`, so in practice step 3 only
/// matters for library callers.
///
/// # Returns
///
/// Returns the path to the database file, or `None` if no location found.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Ok(db_path) = std::env::var("TW_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    default_db_path()
}

/// Get the default actor name.
///
/// Priority:
/// 1. `TW_ACTOR` environment variable
/// 2. Git user name
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("TW_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_actor() {
        let actor = default_actor();
        assert!(!actor.is_empty());
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_default_db_path_file_name() {
        let path = default_db_path().unwrap();
        assert!(path.ends_with(DB_FILE_NAME));
    }

    #[test]
    fn test_test_db_path_is_separate() {
        let global = global_techwatch_dir().unwrap();
        let test = test_db_path().unwrap();

        assert!(test.to_string_lossy().contains("test"));
        assert!(test.ends_with(DB_FILE_NAME));
        assert_ne!(global.join("data").join(DB_FILE_NAME), test);
    }

    #[test]
    fn test_truthy_parsing() {
        for falsy in ["", "0", "false", "FALSE"] {
            assert!(!is_truthy(falsy), "{falsy:?} should be falsy");
        }
        for truthy in ["1", "true", "yes"] {
            assert!(is_truthy(truthy), "{truthy:?} should be truthy");
        }
    }
}
