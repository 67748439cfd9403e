//! Lifecycle of one tracked resource.
//!
//! A [`Manageable`] ties a backend, a wrapper and a metadata entry together.
//! It holds no cached state: every decision recomputes the state by asking
//! the backend whether the recorded session is alive.

use crate::backend::{Backend, SessionBackend, Termination};
use crate::config::SpmiConfig;
use crate::error::{Result, SpmiError};
use crate::metadata::{MetadataEntry, ResourceLock, StoredDescriptor};
use crate::platform;
use crate::wrapper::Wrapper;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Active,
    Inactive,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Active => "active",
            TaskState::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time report produced by [`Manageable::status`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub comment: String,
    pub kind: String,
    pub state: TaskState,
    pub backend: String,
    /// Session handle of the current or last run.
    pub handle: Option<String>,
    /// Wrapper pid of the current or last run.
    pub pid: Option<u32>,
    pub command: String,
    /// Only defined once the resource is inactive.
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    /// Separate stderr capture, absent in mixed mode.
    pub error_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transition: Option<DateTime<Utc>>,
}

/// One tracked resource.
#[derive(Debug, Clone)]
pub struct Manageable {
    id: String,
    comment: String,
    kind: String,
    created_at: DateTime<Utc>,
    backend: Backend,
    wrapper: Wrapper,
    entry: MetadataEntry,
    config: Arc<SpmiConfig>,
}

impl Manageable {
    /// Build the lifecycle object for a persisted descriptor.
    pub fn new(config: Arc<SpmiConfig>, entry: MetadataEntry, descriptor: StoredDescriptor) -> Self {
        let record = descriptor.config;
        Self {
            id: record.id().to_string(),
            comment: record.comment().to_string(),
            kind: record.kind().to_string(),
            created_at: descriptor.created_at,
            backend: Backend::from_config(record.backend()),
            wrapper: Wrapper::from_config(record.wrapper()),
            entry,
            config,
        }
    }

    /// Reconstruct from an existing entry directory.
    pub fn open(config: Arc<SpmiConfig>, entry: MetadataEntry) -> Result<Self> {
        let descriptor = entry.read_descriptor()?;
        if descriptor.config.id() != entry.id() {
            return Err(SpmiError::Config {
                message: format!(
                    "descriptor id '{}' does not match its directory",
                    descriptor.config.id()
                ),
                path: Some(entry.path().to_path_buf()),
            });
        }
        Ok(Self::new(config, entry, descriptor))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn wrapper(&self) -> &Wrapper {
        &self.wrapper
    }

    pub fn entry(&self) -> &MetadataEntry {
        &self.entry
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state, recomputed from the backend.
    pub fn state(&self) -> Result<TaskState> {
        Ok(match self.active_handle()? {
            Some(_) => TaskState::Active,
            None => TaskState::Inactive,
        })
    }

    /// Side-effect-free status report.
    pub fn status(&self) -> Result<TaskStatus> {
        let handle = self.entry.read_backend_id()?;
        let state = match self.active_handle()? {
            Some(_) => TaskState::Active,
            None => TaskState::Inactive,
        };

        let exit_code = match state {
            TaskState::Active => None,
            TaskState::Inactive => {
                let code = self.entry.read_exit_code()?;
                if code.is_none() && handle.is_some() {
                    warn!("{} is inactive but has no recorded exit code", self.id);
                }
                code
            }
        };

        Ok(TaskStatus {
            id: self.id.clone(),
            comment: self.comment.clone(),
            kind: self.kind.clone(),
            state,
            backend: self.backend.kind().to_string(),
            handle,
            pid: self.entry.read_pid()?,
            command: self.wrapper.command().to_string(),
            exit_code,
            output: self.entry.read_output()?,
            error_output: if self.wrapper.mixed_stdout() {
                None
            } else {
                self.entry.read_error_output()?
            },
            created_at: self.created_at,
            last_transition: self.entry.read_transition()?,
        })
    }

    /// Inactive -> Active.
    pub fn start(&self) -> Result<()> {
        let _lock = self.lock()?;
        self.start_locked()
    }

    /// Active -> Inactive, politely.
    pub fn stop(&self) -> Result<()> {
        let _lock = self.lock()?;

        let handle = self.active_handle()?.ok_or_else(|| SpmiError::NotActive {
            id: self.id.clone(),
        })?;

        info!("Stopping {}", self.id);
        self.backend
            .terminate(&handle, self.entry.read_pid()?, Termination::Graceful)?;

        if !self.wait_finished(&handle, self.config.stop_timeout) {
            warn!(
                "{} still running {:?} after stop request",
                self.id, self.config.stop_timeout
            );
        }
        self.entry.write_transition(Utc::now())
    }

    /// Active -> Inactive, forcibly. A no-op when already inactive.
    pub fn kill(&self) -> Result<()> {
        let _lock = self.lock()?;
        self.kill_locked()
    }

    /// Kill if active, then start again.
    pub fn restart(&self) -> Result<()> {
        let _lock = self.lock()?;
        self.kill_locked()?;
        self.start_locked()
    }

    /// Inactive -> Removed. Nothing is touched when the resource is active.
    pub fn clean(&self) -> Result<()> {
        let _lock = self.lock()?;

        if self.state()? == TaskState::Active {
            return Err(SpmiError::Busy {
                id: self.id.clone(),
            });
        }
        self.entry.remove()
    }

    /// Forward one line to the running command's stdin.
    pub fn connect(&self, line: &str) -> Result<()> {
        let handle = self.active_handle()?.ok_or_else(|| SpmiError::NotActive {
            id: self.id.clone(),
        })?;
        self.backend.send_input(&handle, &self.entry, line)
    }

    fn lock(&self) -> Result<ResourceLock> {
        ResourceLock::acquire(&self.config.locks_dir(), &self.id)
    }

    /// Handle of the live session, if any. A recorded exit code ends the
    /// run regardless of what the backend reports for a stale handle.
    fn active_handle(&self) -> Result<Option<String>> {
        if self.entry.read_exit_code()?.is_some() {
            return Ok(None);
        }
        match self.entry.read_backend_id()? {
            Some(handle) if self.backend.is_alive(&handle)? => Ok(Some(handle)),
            _ => Ok(None),
        }
    }

    fn start_locked(&self) -> Result<()> {
        if self.active_handle()?.is_some() {
            return Err(SpmiError::AlreadyActive {
                id: self.id.clone(),
            });
        }

        self.entry.clear_runtime()?;

        let invocation = self.wrapper.invocation(
            &self.config.wrapper_program,
            &self.entry,
            self.backend.input_mode(),
        );
        let handle = self.backend.spawn(&self.id, &self.entry, &invocation)?;
        self.entry.write_backend_id(&handle)?;

        let supervised = platform::wait_until(
            self.config.spawn_timeout,
            self.config.poll_interval,
            || matches!(self.entry.read_pid(), Ok(Some(_))),
        );
        if !supervised {
            if self.backend.is_alive(&handle)? {
                warn!("{} started but its wrapper has not reported a pid yet", self.id);
            } else {
                return Err(SpmiError::BackendUnavailable {
                    tool: self.backend.kind().to_string(),
                    message: format!("session {} ended before the wrapper started", handle),
                });
            }
        }

        self.entry.write_transition(Utc::now())?;
        info!("Started {} (session {})", self.id, handle);
        Ok(())
    }

    fn kill_locked(&self) -> Result<()> {
        let Some(handle) = self.active_handle()? else {
            debug!("{} is not active, nothing to kill", self.id);
            return Ok(());
        };

        info!("Killing {}", self.id);
        self.backend
            .terminate(&handle, self.entry.read_pid()?, Termination::Forced)?;

        if !self.wait_finished(&handle, self.config.kill_timeout) && self.backend.is_alive(&handle)? {
            return Err(SpmiError::BackendUnavailable {
                tool: self.backend.kind().to_string(),
                message: format!("session {} survived forced termination", handle),
            });
        }
        self.entry.write_transition(Utc::now())
    }

    /// Wait until the session is gone and the wrapper has recorded the exit
    /// status.
    fn wait_finished(&self, handle: &str, timeout: Duration) -> bool {
        platform::wait_until(timeout, self.config.poll_interval, || {
            !self.backend.is_alive(handle).unwrap_or(true)
                && matches!(self.entry.read_exit_code(), Ok(Some(_)))
        })
    }
}
