//! Archive file operations.
//!
//! Writes are atomic: content goes to a temp file next to the target, is
//! synced to disk, then renamed over the target. A crash mid-export never
//! leaves a truncated archive behind.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::exchange::types::{ExchangeError, ExchangeResult};

/// Write bytes to a file atomically.
///
/// # Errors
///
/// Returns an error if any file operation fails. The original file, if any,
/// remains untouched on failure.
pub fn atomic_write(path: &Path, content: &[u8]) -> ExchangeResult<()> {
    let temp_path = temp_path_for(path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Read an archive file into memory.
///
/// # Errors
///
/// Returns `MalformedArchive` if the file does not exist, or an IO error if
/// it cannot be read.
pub fn read_archive(path: &Path) -> ExchangeResult<Vec<u8>> {
    if !path.exists() {
        return Err(ExchangeError::MalformedArchive(format!(
            "archive not found: {}",
            path.display()
        )));
    }
    Ok(fs::read(path)?)
}

/// Default file name for an export, e.g. `techwatch-full-20250120.zip`.
#[must_use]
pub fn default_archive_name(label: &str) -> PathBuf {
    let date = chrono::Utc::now().format("%Y%m%d");
    PathBuf::from(format!("techwatch-{label}-{date}.zip"))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("out.zip");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp_dir.path().join("nested").join("out.zip.tmp").exists());
    }

    #[test]
    fn test_read_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_archive(&temp_dir.path().join("absent.zip")).unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedArchive(_)));
    }

    #[test]
    fn test_default_archive_name() {
        let name = default_archive_name("redacted");
        let name = name.to_string_lossy();
        assert!(name.starts_with("techwatch-redacted-"));
        assert!(name.ends_with(".zip"));
    }
}
