//! Platform-specific process management.
//!
//! Liveness checks, signal delivery and bounded polling used by the
//! backends and by the lifecycle transitions.

use crate::error::{Result, SpmiError};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// A zombie that is our own child is reaped first; other zombies (orphans
/// waiting for a parent that does not reap) are reported dead as well.
/// `EPERM` means the process exists but belongs to someone else.
pub fn is_process_alive(pid: u32) -> bool {
    let Some(nix_pid) = to_pid(pid) else {
        return false;
    };

    reap(nix_pid);

    match kill(nix_pid, None) {
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

/// State field of `/proc/<pid>/stat`; false where procfs is unavailable.
fn is_zombie(pid: u32) -> bool {
    stat_fields(pid)
        .and_then(|fields| fields.into_iter().next())
        .is_some_and(|state| state == "Z")
}

/// Start time of `pid` in clock ticks since boot (`/proc/<pid>/stat` field
/// 22). Together with the pid it identifies one process across pid reuse.
pub fn process_start_time(pid: u32) -> Option<u64> {
    // Fields after the command name start at field 3 (state)
    stat_fields(pid)?.get(22 - 3)?.parse().ok()
}

/// Fields of `/proc/<pid>/stat` following the command name.
fn stat_fields(pid: u32) -> Option<Vec<String>> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // The command name may contain spaces and parens
    let (_, rest) = stat.rsplit_once(')')?;
    Some(rest.split_whitespace().map(str::to_string).collect())
}

/// Send `signal` to a single process.
///
/// Returns `false` if the process does not exist.
pub fn send_signal(pid: u32, signal: Signal) -> Result<bool> {
    let nix_pid = to_pid(pid).ok_or_else(|| SpmiError::Other(format!("invalid pid {}", pid)))?;

    debug!("Sending {} to process {}", signal, pid);
    match kill(nix_pid, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(SpmiError::Other(format!(
            "Failed to send {} to process {}: {}",
            signal, pid, e
        ))),
    }
}

/// Send `signal` to every process in the group led by `pgid`.
///
/// Returns `false` if the group no longer exists.
pub fn signal_group(pgid: u32, signal: Signal) -> Result<bool> {
    let nix_pid =
        to_pid(pgid).ok_or_else(|| SpmiError::Other(format!("invalid process group {}", pgid)))?;

    debug!("Sending {} to process group {}", signal, pgid);
    match killpg(nix_pid, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(SpmiError::Other(format!(
            "Failed to send {} to process group {}: {}",
            signal, pgid, e
        ))),
    }
}

/// Poll `condition` every `interval` until it holds or `timeout` elapses.
///
/// Returns whether the condition was observed to hold.
pub fn wait_until(
    timeout: Duration,
    interval: Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let start = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return condition();
        }
        sleep(interval);
    }
}

/// Exit code convention for a finished child: the status code on natural
/// exit, the negated signal number when killed by a signal.
pub fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}

fn reap(pid: Pid) {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => debug!("waitpid({}) -> {:?}", pid, status),
        // ECHILD: not our child, init reaps it
        Err(_) => {}
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}
