//! Session/job manager adapters.
//!
//! A backend starts a detached session running the wrapper invocation and
//! later answers liveness queries, forwards input and terminates it. The set
//! of backends is closed: [`Backend`] is built from a [`BackendConfig`] by a
//! plain match, and unknown type tags never get past descriptor parsing.

mod local;
mod screen;
mod slurm;

pub use local::LocalBackend;
pub use screen::ScreenBackend;
pub use slurm::SlurmBackend;

use crate::descriptor::BackendConfig;
use crate::error::{Result, SpmiError};
use crate::metadata::MetadataEntry;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::process::{Command, Output};
use tracing::debug;

/// How the wrapper wires the command's standard input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    /// Inherit the session's terminal; input arrives as keystrokes.
    Terminal,
    /// Read from the entry's `input` FIFO.
    Fifo,
}

impl StdinMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StdinMode::Terminal => "terminal",
            StdinMode::Fifo => "fifo",
        }
    }
}

impl std::str::FromStr for StdinMode {
    type Err = SpmiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "terminal" => Ok(StdinMode::Terminal),
            "fifo" => Ok(StdinMode::Fifo),
            other => Err(SpmiError::config(format!("Unknown stdin mode '{}'", other))),
        }
    }
}

/// Termination strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Polite request; the command may clean up.
    Graceful,
    /// Tear the session down.
    Forced,
}

/// Program and arguments a backend runs inside its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// The invocation as one POSIX shell line, every word single-quoted.
    pub fn shell_line(&self) -> String {
        self.argv()
            .into_iter()
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Operations every session/job manager adapter provides.
pub trait SessionBackend {
    /// Backend type tag.
    fn kind(&self) -> &'static str;

    /// Stdin wiring the wrapper must use under this backend.
    fn input_mode(&self) -> StdinMode;

    /// Start a detached session running `invocation`; returns its handle.
    fn spawn(&self, id: &str, entry: &MetadataEntry, invocation: &Invocation) -> Result<String>;

    /// Whether the manager still knows the session.
    fn is_alive(&self, handle: &str) -> Result<bool>;

    /// Deliver one line, newline appended, to the command's stdin.
    fn send_input(&self, handle: &str, entry: &MetadataEntry, line: &str) -> Result<()>;

    /// Request termination. `wrapper_pid` is the supervisor's recorded pid,
    /// if any.
    fn terminate(&self, handle: &str, wrapper_pid: Option<u32>, mode: Termination) -> Result<()>;
}

/// The closed set of backends.
#[derive(Debug, Clone)]
pub enum Backend {
    Screen(ScreenBackend),
    Slurm(SlurmBackend),
    Local(LocalBackend),
}

impl Backend {
    /// Build the backend selected by a configuration record.
    pub fn from_config(config: &BackendConfig) -> Self {
        match config {
            BackendConfig::Screen(screen) => Backend::Screen(ScreenBackend::new(
                screen.name_prefix.clone().unwrap_or_else(|| "spmi".to_string()),
            )),
            BackendConfig::Slurm(slurm) => Backend::Slurm(SlurmBackend::new(slurm.options.clone())),
            BackendConfig::Local(_) => Backend::Local(LocalBackend),
        }
    }

    fn inner(&self) -> &dyn SessionBackend {
        match self {
            Backend::Screen(b) => b,
            Backend::Slurm(b) => b,
            Backend::Local(b) => b,
        }
    }
}

impl SessionBackend for Backend {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn input_mode(&self) -> StdinMode {
        self.inner().input_mode()
    }

    fn spawn(&self, id: &str, entry: &MetadataEntry, invocation: &Invocation) -> Result<String> {
        self.inner().spawn(id, entry, invocation)
    }

    fn is_alive(&self, handle: &str) -> Result<bool> {
        self.inner().is_alive(handle)
    }

    fn send_input(&self, handle: &str, entry: &MetadataEntry, line: &str) -> Result<()> {
        self.inner().send_input(handle, entry, line)
    }

    fn terminate(&self, handle: &str, wrapper_pid: Option<u32>, mode: Termination) -> Result<()> {
        self.inner().terminate(handle, wrapper_pid, mode)
    }
}

/// Run an external tool and collect its output whatever the exit status.
///
/// Only a failure to execute the tool is an error here.
pub(crate) fn run_tool_output(tool: &str, args: &[&str]) -> Result<Output> {
    debug!("Running {} {:?}", tool, args);
    Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| SpmiError::BackendUnavailable {
            tool: tool.to_string(),
            message: e.to_string(),
        })
}

/// Run an external tool; a nonzero exit is reported with its stderr verbatim.
pub(crate) fn run_tool(tool: &str, args: &[&str]) -> Result<String> {
    let output = run_tool_output(tool, args)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err(SpmiError::BackendUnavailable {
            tool: tool.to_string(),
            message,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Write one line into the entry's input FIFO.
///
/// Opened non-blocking so a FIFO without a reader fails instead of hanging.
pub(crate) fn write_fifo_line(entry: &MetadataEntry, line: &str) -> Result<()> {
    let path = entry.input_path();
    let mut fifo = OpenOptions::new()
        .write(true)
        .custom_flags(nix::fcntl::OFlag::O_NONBLOCK.bits())
        .open(&path)
        .map_err(|e| SpmiError::io_with_path(e, &path))?;

    let mut data = line.as_bytes().to_vec();
    data.push(b'\n');
    fifo.write_all(&data)
        .map_err(|e| SpmiError::io_with_path(e, &path))?;

    debug!("Wrote {} byte(s) to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{LocalConfig, ScreenConfig, SlurmConfig};

    #[test]
    fn test_from_config_selects_variant() {
        let screen = Backend::from_config(&BackendConfig::Screen(ScreenConfig::default()));
        assert_eq!(screen.kind(), "screen");
        assert_eq!(screen.input_mode(), StdinMode::Terminal);

        let slurm = Backend::from_config(&BackendConfig::Slurm(SlurmConfig::default()));
        assert_eq!(slurm.kind(), "slurm");
        assert_eq!(slurm.input_mode(), StdinMode::Fifo);

        let local = Backend::from_config(&BackendConfig::Local(LocalConfig {}));
        assert_eq!(local.kind(), "local");
        assert_eq!(local.input_mode(), StdinMode::Fifo);
    }

    #[test]
    fn test_shell_line_quotes_words() {
        let invocation = Invocation {
            program: "/usr/bin/spmi".to_string(),
            args: vec!["wrap".to_string(), "/home/o'neil/.spmi/cal".to_string()],
        };
        assert_eq!(
            invocation.shell_line(),
            r"'/usr/bin/spmi' 'wrap' '/home/o'\''neil/.spmi/cal'"
        );
    }

    #[test]
    fn test_stdin_mode_round_trip() {
        for mode in [StdinMode::Terminal, StdinMode::Fifo] {
            assert_eq!(mode.as_str().parse::<StdinMode>().unwrap(), mode);
        }
        assert!("tty".parse::<StdinMode>().is_err());
    }

    #[test]
    fn test_missing_tool_is_backend_unavailable() {
        let err = run_tool("spmi-no-such-tool", &["-ls"]).unwrap_err();
        match err {
            SpmiError::BackendUnavailable { tool, .. } => assert_eq!(tool, "spmi-no-such-tool"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_failing_tool_reports_stderr() {
        let err = run_tool("sh", &["-c", "echo 'queue offline' >&2; exit 3"]).unwrap_err();
        match err {
            SpmiError::BackendUnavailable { message, .. } => assert_eq!(message, "queue offline"),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
