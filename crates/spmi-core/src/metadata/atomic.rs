//! Atomic file operations for metadata artifacts.
//!
//! Writes go through a temp file with a unique PID+TID suffix in the target
//! directory, are fsynced, then renamed into place, so a concurrent reader
//! sees either the old or the new contents. [`write_once`] links instead of
//! renaming, which refuses to replace an existing artifact.

use crate::error::{Result, SpmiError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::debug;

/// Read a text artifact. Returns `None` if it doesn't exist.
pub fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SpmiError::Io {
            message: format!("Failed to read {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }),
    }
}

/// Read and parse a JSON artifact. Returns `None` if it doesn't exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(contents) = read_text(path)? else {
        return Ok(None);
    };

    let data: T = serde_json::from_str(&contents).map_err(|e| SpmiError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Write bytes to `path` atomically, replacing any previous contents.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = write_temp(path, contents)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        SpmiError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data).map_err(|e| SpmiError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;

    atomic_write(path, serialized.as_bytes())
}

/// Write bytes to `path` only if it does not exist yet.
///
/// Returns `false` without touching the file when it is already present.
/// Readers never see a partially written file.
pub fn write_once(path: &Path, contents: &[u8]) -> Result<bool> {
    let temp_path = write_temp(path, contents)?;

    let result = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);

    match result {
        Ok(()) => {
            debug!("Wrote {} once", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!("{} already written, keeping it", path.display());
            Ok(false)
        }
        Err(e) => Err(SpmiError::Io {
            message: format!("Failed to link {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }),
    }
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SpmiError::io_with_path(e, path)),
    }
}

fn write_temp(path: &Path, contents: &[u8]) -> Result<PathBuf> {
    let temp_path = temp_path_for(path);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| SpmiError::Io {
            message: format!("Failed to create temp file {}", temp_path.display()),
            path: Some(temp_path.clone()),
            source: Some(e),
        })?;

    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            SpmiError::Io {
                message: format!("Failed to write temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            }
        })?;

    Ok(temp_path)
}

/// `dir/.name.<pid>.<tid>.tmp`, hidden so directory scans ignore it.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(".{}.{}.{}.tmp", name, process::id(), thread_id());
    path.with_file_name(temp_name)
}

/// Get a unique thread identifier.
fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_atomic_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("descriptor");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        atomic_write_json(&path, &data).unwrap();
        assert!(path.exists());

        let read_data: Option<TestData> = read_json(&path).unwrap();
        assert_eq!(read_data, Some(data));
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pid");

        atomic_write(&path, b"1").unwrap();
        atomic_write(&path, b"2").unwrap();

        assert_eq!(read_text(&path).unwrap().as_deref(), Some("2"));
        let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_once_keeps_first_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("exitcode");

        assert!(write_once(&path, b"0").unwrap());
        assert!(!write_once(&path, b"-9").unwrap());
        assert_eq!(read_text(&path).unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn test_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent");

        let result: Option<TestData> = read_json(&path).unwrap();
        assert!(result.is_none());
        assert!(read_text(&path).unwrap().is_none());
        remove_if_exists(&path).unwrap();
    }
}
