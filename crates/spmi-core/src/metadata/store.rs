//! Per-resource metadata entries.
//!
//! Each tracked resource owns one directory under the metadata root:
//!
//! ```text
//! <root>/<id>/descriptor    persisted configuration + creation time (JSON)
//! <root>/<id>/backend_id    session/job handle
//! <root>/<id>/pid           wrapper process id
//! <root>/<id>/exitcode      sticky exit status, written once
//! <root>/<id>/output        captured stdout (+stderr if mixed)
//! <root>/<id>/output.err    captured stderr if not mixed
//! <root>/<id>/transition    time of the last start/stop/kill
//! <root>/<id>/input         FIFO feeding the command's stdin
//! ```
//!
//! The directory is the only state that survives an invocation.

use super::atomic::{atomic_write, atomic_write_json, read_json, read_text, remove_if_exists, write_once};
use crate::config::PathsConfig;
use crate::descriptor::ResourceConfig;
use crate::error::{Result, SpmiError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Contents of the `descriptor` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDescriptor {
    pub config: ResourceConfig,
    pub created_at: DateTime<Utc>,
}

impl StoredDescriptor {
    /// Stamp a record with the current time.
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            config,
            created_at: Utc::now(),
        }
    }
}

/// Handle to one resource directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    path: PathBuf,
}

impl MetadataEntry {
    /// Refer to an existing entry directory.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create the entry for `descriptor` under `root`.
    ///
    /// The directory is assembled under a hidden staging name and renamed
    /// into place, so scanners never see an entry without its descriptor.
    pub fn create(root: &Path, descriptor: &StoredDescriptor) -> Result<Self> {
        let id = descriptor.config.id();
        let path = root.join(id);

        if path.exists() {
            return Err(SpmiError::DuplicateId { id: id.to_string() });
        }

        let staging = root.join(format!(".{}.{}.staging", id, std::process::id()));
        fs::create_dir(&staging).map_err(|e| SpmiError::io_with_path(e, &staging))?;

        let staged = atomic_write_json(&staging.join(PathsConfig::DESCRIPTOR_FILENAME), descriptor)
            .and_then(|()| {
                fs::rename(&staging, &path).map_err(|e| {
                    if path.exists() {
                        SpmiError::DuplicateId { id: id.to_string() }
                    } else {
                        SpmiError::io_with_path(e, &path)
                    }
                })
            });

        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        info!("Created metadata entry {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name, which is the resource id.
    pub fn id(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn read_descriptor(&self) -> Result<StoredDescriptor> {
        let path = self.artifact(PathsConfig::DESCRIPTOR_FILENAME);
        read_json(&path)?.ok_or_else(|| SpmiError::Config {
            message: "metadata entry has no descriptor".to_string(),
            path: Some(path),
        })
    }

    pub fn read_backend_id(&self) -> Result<Option<String>> {
        Ok(read_text(&self.artifact(PathsConfig::BACKEND_ID_FILENAME))?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn write_backend_id(&self, handle: &str) -> Result<()> {
        atomic_write(&self.artifact(PathsConfig::BACKEND_ID_FILENAME), handle.as_bytes())
    }

    pub fn read_pid(&self) -> Result<Option<u32>> {
        self.read_parsed(PathsConfig::PID_FILENAME)
    }

    pub fn write_pid(&self, pid: u32) -> Result<()> {
        atomic_write(&self.artifact(PathsConfig::PID_FILENAME), pid.to_string().as_bytes())
    }

    pub fn read_exit_code(&self) -> Result<Option<i32>> {
        self.read_parsed(PathsConfig::EXIT_CODE_FILENAME)
    }

    /// Record the exit status. Only the first call has any effect; returns
    /// whether this call wrote it.
    pub fn record_exit_code(&self, code: i32) -> Result<bool> {
        write_once(
            &self.artifact(PathsConfig::EXIT_CODE_FILENAME),
            code.to_string().as_bytes(),
        )
    }

    pub fn read_transition(&self) -> Result<Option<DateTime<Utc>>> {
        self.read_parsed(PathsConfig::TRANSITION_FILENAME)
    }

    pub fn write_transition(&self, at: DateTime<Utc>) -> Result<()> {
        atomic_write(
            &self.artifact(PathsConfig::TRANSITION_FILENAME),
            at.to_rfc3339().as_bytes(),
        )
    }

    pub fn output_path(&self) -> PathBuf {
        self.artifact(PathsConfig::OUTPUT_FILENAME)
    }

    pub fn error_output_path(&self) -> PathBuf {
        self.artifact(PathsConfig::ERROR_OUTPUT_FILENAME)
    }

    pub fn input_path(&self) -> PathBuf {
        self.artifact(PathsConfig::INPUT_FIFO_FILENAME)
    }

    /// Session transcript kept by backends that record one.
    pub fn backend_log_path(&self) -> PathBuf {
        self.artifact(PathsConfig::BACKEND_LOG_FILENAME)
    }

    /// Captured stdout so far (lossy UTF-8).
    pub fn read_output(&self) -> Result<Option<String>> {
        read_text(&self.output_path())
    }

    /// Captured stderr so far, when not mixed into stdout.
    pub fn read_error_output(&self) -> Result<Option<String>> {
        read_text(&self.error_output_path())
    }

    /// Create the stdin FIFO if it is missing.
    pub fn create_input_fifo(&self) -> Result<PathBuf> {
        use nix::errno::Errno;
        use nix::sys::stat::Mode;

        let path = self.input_path();
        match nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) | Err(Errno::EEXIST) => Ok(path),
            Err(e) => Err(SpmiError::Io {
                message: format!("Failed to create FIFO: {}", e),
                path: Some(path),
                source: None,
            }),
        }
    }

    /// Drop the artifacts of a previous run so a new start begins clean.
    pub fn clear_runtime(&self) -> Result<()> {
        for name in [
            PathsConfig::BACKEND_ID_FILENAME,
            PathsConfig::PID_FILENAME,
            PathsConfig::EXIT_CODE_FILENAME,
            PathsConfig::OUTPUT_FILENAME,
            PathsConfig::ERROR_OUTPUT_FILENAME,
            PathsConfig::INPUT_FIFO_FILENAME,
            PathsConfig::BACKEND_LOG_FILENAME,
        ] {
            remove_if_exists(&self.artifact(name))?;
        }
        debug!("Cleared runtime artifacts of {}", self.path.display());
        Ok(())
    }

    /// Delete the whole entry.
    pub fn remove(&self) -> Result<()> {
        fs::remove_dir_all(&self.path).map_err(|e| SpmiError::io_with_path(e, &self.path))?;
        info!("Removed metadata entry {}", self.path.display());
        Ok(())
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn read_parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        let path = self.artifact(name);
        let Some(text) = read_text(&path)? else {
            return Ok(None);
        };

        text.trim().parse().map(Some).map_err(|e: T::Err| SpmiError::Io {
            message: format!("Corrupt artifact: {}", e),
            path: Some(path),
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{parse_str, Format};
    use tempfile::TempDir;

    fn record(id: &str) -> ResourceConfig {
        parse_str(
            &format!(
                r#"{{"type":"task","id":"{}","backend":{{"type":"local"}},
                    "wrapper":{{"type":"default","command":"echo hi"}}}}"#,
                id
            ),
            Format::Json,
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_read_descriptor() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = StoredDescriptor::new(record("echo"));

        let entry = MetadataEntry::create(temp_dir.path(), &descriptor).unwrap();

        assert_eq!(entry.id(), "echo");
        assert!(entry.exists());
        assert_eq!(entry.read_descriptor().unwrap(), descriptor);

        // Only the entry itself remains, no staging directory
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("echo")]);
    }

    #[test]
    fn test_create_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = StoredDescriptor::new(record("dup"));

        MetadataEntry::create(temp_dir.path(), &descriptor).unwrap();
        let err = MetadataEntry::create(temp_dir.path(), &descriptor).unwrap_err();
        assert!(matches!(err, SpmiError::DuplicateId { id } if id == "dup"));
    }

    #[test]
    fn test_runtime_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let entry =
            MetadataEntry::create(temp_dir.path(), &StoredDescriptor::new(record("rt"))).unwrap();

        assert_eq!(entry.read_pid().unwrap(), None);
        assert_eq!(entry.read_exit_code().unwrap(), None);
        assert_eq!(entry.read_backend_id().unwrap(), None);

        entry.write_pid(4242).unwrap();
        entry.write_backend_id("123.spmi-rt-abcd").unwrap();
        assert!(entry.record_exit_code(-15).unwrap());
        assert!(!entry.record_exit_code(0).unwrap());

        assert_eq!(entry.read_pid().unwrap(), Some(4242));
        assert_eq!(entry.read_backend_id().unwrap().as_deref(), Some("123.spmi-rt-abcd"));
        assert_eq!(entry.read_exit_code().unwrap(), Some(-15));

        let now = Utc::now();
        entry.write_transition(now).unwrap();
        assert_eq!(entry.read_transition().unwrap(), Some(now));

        entry.clear_runtime().unwrap();
        assert_eq!(entry.read_pid().unwrap(), None);
        assert_eq!(entry.read_exit_code().unwrap(), None);
        assert!(entry.read_descriptor().is_ok());
    }

    #[test]
    fn test_corrupt_pid_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let entry =
            MetadataEntry::create(temp_dir.path(), &StoredDescriptor::new(record("bad"))).unwrap();
        fs::write(entry.path().join("pid"), "not-a-pid").unwrap();

        assert!(entry.read_pid().is_err());
    }

    #[test]
    fn test_input_fifo_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let entry =
            MetadataEntry::create(temp_dir.path(), &StoredDescriptor::new(record("fifo"))).unwrap();

        let fifo = entry.create_input_fifo().unwrap();
        entry.create_input_fifo().unwrap();
        assert!(fifo.exists());

        entry.remove().unwrap();
        assert!(!entry.exists());
    }
}
