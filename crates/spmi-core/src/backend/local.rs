//! Local backend: the wrapper runs as a detached process on this host.
//!
//! No external manager is involved. The handle is `<pid>:<start time>`, so
//! a recycled pid is never mistaken for the wrapper.

use super::{write_fifo_line, Invocation, SessionBackend, StdinMode, Termination};
use crate::error::{Result, SpmiError};
use crate::metadata::MetadataEntry;
use crate::platform;
use nix::sys::signal::Signal;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl LocalBackend {
    /// Split a handle into pid and, when recorded, the process start time.
    fn parse_handle(handle: &str) -> Result<(u32, Option<u64>)> {
        let invalid = || SpmiError::Other(format!("Invalid local session handle '{}'", handle));
        let (pid, start) = match handle.trim().split_once(':') {
            Some((pid, start)) => (pid, Some(start.parse().map_err(|_| invalid())?)),
            None => (handle.trim(), None),
        };
        Ok((pid.parse().map_err(|_| invalid())?, start))
    }

    /// The live process behind `handle`, if it is still the one spawned.
    fn live_pid(handle: &str) -> Result<Option<u32>> {
        let (pid, start) = Self::parse_handle(handle)?;
        if !platform::is_process_alive(pid) {
            return Ok(None);
        }
        match start {
            Some(start) if platform::process_start_time(pid) != Some(start) => {
                debug!("PID {} was reused, session {} is gone", pid, handle);
                Ok(None)
            }
            _ => Ok(Some(pid)),
        }
    }
}

impl SessionBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn input_mode(&self) -> StdinMode {
        StdinMode::Fifo
    }

    fn spawn(&self, id: &str, _entry: &MetadataEntry, invocation: &Invocation) -> Result<String> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group: terminal job control never reaches it
            .process_group(0);

        let child = cmd.spawn().map_err(|e| SpmiError::BackendUnavailable {
            tool: invocation.program.clone(),
            message: e.to_string(),
        })?;

        // The child is not waited on here; liveness checks reap it.
        let pid = child.id();
        info!("Launched {} with PID {}", id, pid);
        Ok(match platform::process_start_time(pid) {
            Some(start) => format!("{}:{}", pid, start),
            None => pid.to_string(),
        })
    }

    fn is_alive(&self, handle: &str) -> Result<bool> {
        Ok(Self::live_pid(handle)?.is_some())
    }

    fn send_input(&self, _handle: &str, entry: &MetadataEntry, line: &str) -> Result<()> {
        write_fifo_line(entry, line)
    }

    fn terminate(&self, handle: &str, _wrapper_pid: Option<u32>, mode: Termination) -> Result<()> {
        let signal = match mode {
            Termination::Graceful => Signal::SIGTERM,
            Termination::Forced => Signal::SIGHUP,
        };
        match Self::live_pid(handle)? {
            Some(pid) => platform::send_signal(pid, signal).map(drop),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::wait_until;
    use std::time::Duration;

    #[test]
    fn test_spawn_and_terminate() {
        let backend = LocalBackend;
        let invocation = Invocation {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
        };

        let entry = MetadataEntry::at("/nonexistent/sleeper");
        let handle = backend.spawn("sleeper", &entry, &invocation).unwrap();
        assert!(handle.contains(':'));
        assert!(backend.is_alive(&handle).unwrap());

        backend.terminate(&handle, None, Termination::Forced).unwrap();
        assert!(wait_until(
            Duration::from_secs(5),
            Duration::from_millis(20),
            || !backend.is_alive(&handle).unwrap()
        ));

        // Already gone: signalling again is not an error
        backend.terminate(&handle, None, Termination::Graceful).unwrap();
    }

    #[test]
    fn test_spawn_missing_program() {
        let invocation = Invocation {
            program: "/nonexistent/spmi".to_string(),
            args: vec![],
        };
        assert!(matches!(
            LocalBackend.spawn("x", &MetadataEntry::at("/nonexistent/x"), &invocation),
            Err(SpmiError::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn test_invalid_handle() {
        assert!(LocalBackend.is_alive("not-a-pid").is_err());
        assert!(LocalBackend.is_alive("12:abc").is_err());
    }

    #[test]
    fn test_reused_pid_is_not_the_session() {
        let mut other = Command::new("sleep").arg("30").spawn().unwrap();
        let start = platform::process_start_time(other.id()).unwrap();

        let current = format!("{}:{}", other.id(), start);
        assert!(LocalBackend.is_alive(&current).unwrap());

        // Same pid, different process: neither alive nor signalled
        let stale = format!("{}:{}", other.id(), start + 1);
        assert!(!LocalBackend.is_alive(&stale).unwrap());
        LocalBackend.terminate(&stale, None, Termination::Forced).unwrap();
        assert!(other.try_wait().unwrap().is_none());

        other.kill().unwrap();
        other.wait().unwrap();
    }
}
