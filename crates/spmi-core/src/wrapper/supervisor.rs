//! The in-session supervisor behind `spmi wrap`.
//!
//! Runs inside the backend's session and owns the user command for its whole
//! lifetime:
//!
//! 1. creates the input FIFO (fifo mode) and records its own pid;
//! 2. spawns `/bin/sh -c <command>` with output redirected to the entry;
//! 3. forwards SIGTERM/SIGINT to the command and turns SIGHUP (session torn
//!    down) into SIGKILL;
//! 4. records the exit status exactly once.
//!
//! In fifo mode the command gets its own process group and signals go to the
//! whole group. In terminal mode the command stays in the terminal's
//! foreground group so it can read the terminal; signals go to the shell
//! process, and SIGINT is not forwarded because the terminal already
//! delivers it to the group.

use crate::backend::StdinMode;
use crate::error::{Result, SpmiError};
use crate::metadata::MetadataEntry;
use crate::platform::{self, exit_code_of};
use crate::wrapper::Wrapper;
use nix::sys::signal::Signal;
use std::fs::{File, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

/// Exit status recorded when the command cannot be started at all.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Exit status recorded when supervision fails after the pid is published.
pub const SUPERVISOR_FAILURE_CODE: i32 = 125;

struct Signals {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

/// Supervise the command of the entry at `entry_dir`.
///
/// Returns the recorded exit status.
pub fn run(entry_dir: &Path, stdin: StdinMode) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SpmiError::Other(format!("Failed to start supervisor runtime: {}", e)))?;

    runtime.block_on(supervise(MetadataEntry::at(entry_dir), stdin))
}

async fn supervise(entry: MetadataEntry, stdin: StdinMode) -> Result<i32> {
    let descriptor = entry.read_descriptor()?;
    let wrapper = Wrapper::from_config(descriptor.config.wrapper());

    // Installed before anything is visible to other invocations, so an early
    // stop cannot kill the supervisor with the default disposition.
    let handler_error =
        |e: std::io::Error| SpmiError::Other(format!("Failed to install signal handler: {}", e));
    let signals = Signals {
        term: signal(SignalKind::terminate()).map_err(handler_error)?,
        int: signal(SignalKind::interrupt()).map_err(handler_error)?,
        hup: signal(SignalKind::hangup()).map_err(handler_error)?,
    };

    let child_stdin = match stdin {
        StdinMode::Terminal => Stdio::inherit(),
        StdinMode::Fifo => {
            let fifo = entry.create_input_fifo()?;
            // Read-write so the command never sees EOF between writers
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&fifo)
                .map_err(|e| SpmiError::io_with_path(e, &fifo))?;
            Stdio::from(file)
        }
    };

    entry.write_pid(std::process::id())?;

    // From here on a reader expects an exit code once the session is gone
    match run_command(&entry, &wrapper, stdin, child_stdin, signals).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!("Supervision failed: {}", e);
            if let Err(record_error) = entry.record_exit_code(SUPERVISOR_FAILURE_CODE) {
                warn!("Failed to record exit code: {}", record_error);
            }
            Err(e)
        }
    }
}

async fn run_command(
    entry: &MetadataEntry,
    wrapper: &Wrapper,
    stdin: StdinMode,
    child_stdin: Stdio,
    mut signals: Signals,
) -> Result<i32> {
    let (stdout, stderr) = open_output(entry, wrapper.mixed_stdout())?;

    let mut cmd = std::process::Command::new(platform::command_shell());
    cmd.arg("-c")
        .arg(wrapper.command())
        .stdin(child_stdin)
        .stdout(stdout)
        .stderr(stderr);
    if stdin == StdinMode::Fifo {
        cmd.process_group(0);
    }

    let mut child = match tokio::process::Command::from(cmd).spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn '{}': {}", wrapper.command(), e);
            entry.record_exit_code(SPAWN_FAILURE_CODE)?;
            return Ok(SPAWN_FAILURE_CODE);
        }
    };

    let Some(child_pid) = child.id() else {
        return Err(SpmiError::Other("command exited before it was tracked".into()));
    };
    info!("Supervising '{}' as PID {}", wrapper.command(), child_pid);

    let forward = |sig: Signal| {
        let delivered = match stdin {
            StdinMode::Fifo => platform::signal_group(child_pid, sig),
            StdinMode::Terminal => platform::send_signal(child_pid, sig),
        };
        if let Err(e) = delivered {
            warn!("{}", e);
        }
    };

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(|e| SpmiError::Other(format!("Failed to wait for command: {}", e)))?;
            }
            _ = signals.term.recv() => {
                debug!("SIGTERM received, forwarding");
                forward(Signal::SIGTERM);
            }
            _ = signals.int.recv() => {
                if stdin == StdinMode::Fifo {
                    debug!("SIGINT received, forwarding");
                    forward(Signal::SIGINT);
                }
            }
            _ = signals.hup.recv() => {
                debug!("SIGHUP received, killing command");
                forward(Signal::SIGKILL);
            }
        }
    };

    let code = exit_code_of(status);
    if entry.record_exit_code(code)? {
        info!("Command exited with {}", code);
    } else {
        warn!("Exit code already recorded, keeping it");
    }
    Ok(code)
}

/// Stdout and stderr targets: one shared file when mixed.
fn open_output(entry: &MetadataEntry, mixed: bool) -> Result<(File, File)> {
    let create = |path: &Path| File::create(path).map_err(|e| SpmiError::io_with_path(e, path));

    let stdout_path = entry.output_path();
    let stdout = create(&stdout_path)?;

    let stderr = if mixed {
        stdout
            .try_clone()
            .map_err(|e| SpmiError::io_with_path(e, &stdout_path))?
    } else {
        create(&entry.error_output_path())?
    };

    Ok((stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{parse_str, Format};
    use crate::metadata::StoredDescriptor;
    use tempfile::TempDir;

    fn entry_with(temp_dir: &TempDir, id: &str, command: &str, mixed: bool) -> MetadataEntry {
        let record = parse_str(
            &format!(
                r#"{{"type":"task","id":"{}","backend":{{"type":"local"}},
                    "wrapper":{{"type":"default","command":{},"mixed_stdout":{}}}}}"#,
                id,
                serde_json::to_string(command).unwrap(),
                mixed
            ),
            Format::Json,
        )
        .unwrap();
        MetadataEntry::create(temp_dir.path(), &StoredDescriptor::new(record)).unwrap()
    }

    #[test]
    fn test_natural_exit_is_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let entry = entry_with(&temp_dir, "echo", "echo hello; exit 3", true);

        let code = run(entry.path(), StdinMode::Fifo).unwrap();

        assert_eq!(code, 3);
        assert_eq!(entry.read_exit_code().unwrap(), Some(3));
        assert_eq!(entry.read_pid().unwrap(), Some(std::process::id()));
        assert_eq!(entry.read_output().unwrap().as_deref(), Some("hello\n"));
        assert!(entry.input_path().exists());
    }

    #[test]
    fn test_separate_error_output() {
        let temp_dir = TempDir::new().unwrap();
        let entry = entry_with(&temp_dir, "split", "echo out; echo err >&2", false);

        assert_eq!(run(entry.path(), StdinMode::Fifo).unwrap(), 0);
        assert_eq!(entry.read_output().unwrap().as_deref(), Some("out\n"));
        assert_eq!(entry.read_error_output().unwrap().as_deref(), Some("err\n"));
    }

    #[test]
    fn test_killed_command_records_negative_signal() {
        let temp_dir = TempDir::new().unwrap();
        let entry = entry_with(&temp_dir, "selfkill", "kill -9 $$", true);

        assert_eq!(run(entry.path(), StdinMode::Fifo).unwrap(), -9);
        assert_eq!(entry.read_exit_code().unwrap(), Some(-9));
    }

    #[test]
    fn test_failure_after_pid_records_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let entry = entry_with(&temp_dir, "blocked", "echo never", true);
        // A directory where the output file should go
        std::fs::create_dir(entry.output_path()).unwrap();

        assert!(run(entry.path(), StdinMode::Fifo).is_err());
        assert_eq!(entry.read_pid().unwrap(), Some(std::process::id()));
        assert_eq!(entry.read_exit_code().unwrap(), Some(SUPERVISOR_FAILURE_CODE));
    }

    #[test]
    fn test_missing_descriptor_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(run(&temp_dir.path().join("ghost"), StdinMode::Fifo).is_err());
    }
}
