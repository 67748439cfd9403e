//! Centralized configuration for SPMI.
//!
//! Constants for timeouts and on-disk names, plus [`SpmiConfig`], the
//! per-invocation settings every core component is constructed from.

use crate::error::{Result, SpmiError};
use crate::platform;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    /// Environment variable overriding the metadata root.
    pub const HOME_ENV: &'static str = "SPMI_HOME";
    /// Environment variable holding a tracing filter for the CLI.
    pub const LOG_ENV: &'static str = "SPMI_LOG";
    /// Hidden subcommand the wrapper invocation uses.
    pub const WRAP_SUBCOMMAND: &'static str = "wrap";
}

/// Timing of transitions and external tool polling.
pub struct TimeoutConfig;

impl TimeoutConfig {
    /// How long `stop` waits for the session to wind down.
    pub const STOP_GRACE: Duration = Duration::from_secs(5);
    /// How long `kill` waits for the backend to confirm termination.
    pub const KILL_CONFIRM: Duration = Duration::from_secs(3);
    /// How long `start` waits for the session and the wrapper pid to appear.
    pub const SPAWN_CONFIRM: Duration = Duration::from_secs(5);
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
}

/// Names inside the metadata root.
pub struct PathsConfig;

impl PathsConfig {
    pub const DEFAULT_ROOT_DIR_NAME: &'static str = ".spmi";
    pub const LOCKS_DIR_NAME: &'static str = ".locks";
    pub const DESCRIPTOR_FILENAME: &'static str = "descriptor";
    pub const BACKEND_ID_FILENAME: &'static str = "backend_id";
    pub const PID_FILENAME: &'static str = "pid";
    pub const EXIT_CODE_FILENAME: &'static str = "exitcode";
    pub const OUTPUT_FILENAME: &'static str = "output";
    pub const ERROR_OUTPUT_FILENAME: &'static str = "output.err";
    pub const TRANSITION_FILENAME: &'static str = "transition";
    pub const INPUT_FIFO_FILENAME: &'static str = "input";
    pub const BACKEND_LOG_FILENAME: &'static str = "backend.log";
}

/// Settings for one SPMI invocation.
#[derive(Debug, Clone)]
pub struct SpmiConfig {
    /// Metadata root, one subdirectory per tracked resource.
    pub root: PathBuf,
    /// Program that runs `wrap <entry>` inside a session.
    pub wrapper_program: PathBuf,
    pub stop_timeout: Duration,
    pub kill_timeout: Duration,
    pub spawn_timeout: Duration,
    pub poll_interval: Duration,
}

impl SpmiConfig {
    /// Create a config with default timeouts.
    pub fn new(root: impl Into<PathBuf>, wrapper_program: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            wrapper_program: wrapper_program.into(),
            stop_timeout: TimeoutConfig::STOP_GRACE,
            kill_timeout: TimeoutConfig::KILL_CONFIRM,
            spawn_timeout: TimeoutConfig::SPAWN_CONFIRM,
            poll_interval: TimeoutConfig::POLL_INTERVAL,
        }
    }

    /// Resolve the root from an explicit override, `SPMI_HOME`, or the
    /// default under the home directory, in that order. The wrapper program
    /// is the currently running executable.
    pub fn from_env(root_override: Option<PathBuf>) -> Result<Self> {
        let root = match root_override {
            Some(root) => root,
            None => match std::env::var_os(AppConfig::HOME_ENV) {
                Some(value) if !value.is_empty() => PathBuf::from(value),
                _ => platform::default_root()?,
            },
        };

        let wrapper_program = std::env::current_exe()
            .map_err(|e| SpmiError::config(format!("Cannot locate spmi executable: {}", e)))?;

        Ok(Self::new(root, wrapper_program))
    }

    /// Set the stop grace period.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the kill confirmation timeout.
    pub fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Set the spawn confirmation timeout.
    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    /// Directory holding per-resource lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::LOCKS_DIR_NAME)
    }

    /// Create the root if needed and verify it is a writable directory.
    ///
    /// Called before any mutation so an unusable root aborts the invocation
    /// with existing state untouched.
    pub fn ensure_root(&self) -> Result<()> {
        if !self.root.exists() {
            debug!("Creating metadata root {}", self.root.display());
            fs::create_dir_all(&self.root)
                .map_err(|e| SpmiError::io_with_path(e, &self.root))?;
        }

        if !self.root.is_dir() {
            return Err(SpmiError::Io {
                message: "metadata root is not a directory".to_string(),
                path: Some(self.root.clone()),
                source: None,
            });
        }

        check_writable(&self.root)
    }
}

fn check_writable(dir: &Path) -> Result<()> {
    tempfile::NamedTempFile::new_in(dir)
        .map(drop)
        .map_err(|e| SpmiError::Io {
            message: format!("metadata root is not writable: {}", e),
            path: Some(dir.to_path_buf()),
            source: Some(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(TimeoutConfig::POLL_INTERVAL < TimeoutConfig::KILL_CONFIRM);
        assert!(TimeoutConfig::STOP_GRACE > Duration::ZERO);
    }

    #[test]
    fn test_ensure_root_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested").join("spmi");
        let config = SpmiConfig::new(&root, "/bin/true");

        config.ensure_root().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_ensure_root_rejects_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("file");
        fs::write(&root, "not a dir").unwrap();

        let config = SpmiConfig::new(&root, "/bin/true");
        assert!(config.ensure_root().is_err());
    }

    #[test]
    fn test_explicit_root_wins() {
        let config = SpmiConfig::from_env(Some(PathBuf::from("/tmp/explicit"))).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/explicit"));
        assert!(config.locks_dir().ends_with(".locks"));
    }
}
