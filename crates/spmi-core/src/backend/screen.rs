//! GNU screen backend.
//!
//! Sessions are created detached with a unique name. The handle is the
//! `<pid>.<name>` pair screen prints in `screen -ls`; when the session is
//! already gone by the time we look, the bare name is used instead, which
//! screen accepts everywhere a session is expected.
//!
//! Each session logs its window to `backend.log` in the entry, which keeps
//! supervisor diagnostics that never reach the captured output.

use super::{run_tool, run_tool_output, Invocation, SessionBackend, StdinMode, Termination};
use crate::config::TimeoutConfig;
use crate::error::Result;
use crate::metadata::MetadataEntry;
use crate::platform;
use nix::sys::signal::Signal;
use std::path::Path;
use tracing::{debug, info};

const SCREEN: &str = "screen";

#[derive(Debug, Clone)]
pub struct ScreenBackend {
    name_prefix: String,
}

impl ScreenBackend {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }

    fn session_name(&self, id: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.name_prefix, id, &suffix[..8])
    }

    fn sessions(&self) -> Result<Vec<String>> {
        // Exits nonzero when nothing is running, so only the text counts.
        let output = run_tool_output(SCREEN, &["-ls"])?;
        Ok(parse_session_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn stuff(&self, handle: &str, text: &str) -> Result<()> {
        run_tool(SCREEN, &["-S", handle, "-p", "0", "-X", "stuff", text]).map(drop)
    }
}

impl SessionBackend for ScreenBackend {
    fn kind(&self) -> &'static str {
        "screen"
    }

    fn input_mode(&self) -> StdinMode {
        StdinMode::Terminal
    }

    fn spawn(&self, id: &str, entry: &MetadataEntry, invocation: &Invocation) -> Result<String> {
        let name = self.session_name(id);

        let args = spawn_args(&name, &entry.backend_log_path(), invocation);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_tool(SCREEN, &args)?;

        let mut handle = None;
        platform::wait_until(
            TimeoutConfig::SPAWN_CONFIRM,
            TimeoutConfig::POLL_INTERVAL,
            || {
                handle = self
                    .sessions()
                    .ok()
                    .and_then(|sessions| sessions.into_iter().find(|s| matches_session(s, &name)));
                handle.is_some()
            },
        );

        let handle = handle.unwrap_or_else(|| {
            debug!("Session {} not listed, using its name as handle", name);
            name
        });
        info!("Started screen session {}", handle);
        Ok(handle)
    }

    fn is_alive(&self, handle: &str) -> Result<bool> {
        Ok(self.sessions()?.iter().any(|s| matches_session(s, handle)))
    }

    fn send_input(&self, handle: &str, _entry: &MetadataEntry, line: &str) -> Result<()> {
        self.stuff(handle, &format!("{}\n", escape_stuff(line)))
    }

    fn terminate(&self, handle: &str, wrapper_pid: Option<u32>, mode: Termination) -> Result<()> {
        match mode {
            Termination::Graceful => match wrapper_pid {
                Some(pid) => platform::send_signal(pid, Signal::SIGTERM).map(drop),
                // No supervisor pid yet: interrupt through the terminal.
                None => self.stuff(handle, "^C"),
            },
            Termination::Forced => {
                // The supervisor turns SIGHUP into SIGKILL for the command; give
                // it the chance before screen hangs up the whole window.
                if let Some(pid) = wrapper_pid {
                    if platform::send_signal(pid, Signal::SIGHUP)? {
                        platform::wait_until(
                            TimeoutConfig::KILL_CONFIRM,
                            TimeoutConfig::POLL_INTERVAL,
                            || !platform::is_process_alive(pid),
                        );
                    }
                }

                match run_tool(SCREEN, &["-S", handle, "-X", "quit"]) {
                    Ok(_) => Ok(()),
                    Err(_) if !self.is_alive(handle)? => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

fn spawn_args(name: &str, log: &Path, invocation: &Invocation) -> Vec<String> {
    let mut args = vec![
        "-L".to_string(),
        "-Logfile".to_string(),
        log.to_string_lossy().into_owned(),
        "-dmS".to_string(),
        name.to_string(),
    ];
    args.extend(invocation.argv().into_iter().map(str::to_string));
    args
}

/// Session tokens (`<pid>.<name>`) of live sessions in `screen -ls` output.
fn parse_session_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with('\t') && !line.contains("(Dead"))
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| {
            token
                .split_once('.')
                .is_some_and(|(pid, name)| !name.is_empty() && pid.chars().all(|c| c.is_ascii_digit()))
        })
        .map(str::to_string)
        .collect()
}

/// A handle is either the full `<pid>.<name>` token or just the name.
fn matches_session(token: &str, handle: &str) -> bool {
    token == handle
        || token
            .split_once('.')
            .is_some_and(|(_, name)| name == handle)
}

/// `stuff` interprets `^X` and backslash escapes; make the line literal.
fn escape_stuff(line: &str) -> String {
    line.replace('\\', r"\\").replace('^', r"\^")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LS_OUTPUT: &str = "There are screens on:\n\
        \t4242.spmi-cal-1a2b3c4d\t(10/17/2026 09:12:01 AM)\t(Detached)\n\
        \t977.pts-0.host\t(Attached)\n\
        \t5151.spmi-old-00000000\t(Dead ???)\n\
        3 Sockets in /run/screen/S-user.\n";

    #[test]
    fn test_parse_session_list() {
        assert_eq!(
            parse_session_list(LS_OUTPUT),
            vec!["4242.spmi-cal-1a2b3c4d", "977.pts-0.host"]
        );
        assert!(parse_session_list("No Sockets found in /run/screen/S-user.\n").is_empty());
    }

    #[test]
    fn test_matches_session() {
        assert!(matches_session("4242.spmi-cal-1a2b3c4d", "4242.spmi-cal-1a2b3c4d"));
        assert!(matches_session("4242.spmi-cal-1a2b3c4d", "spmi-cal-1a2b3c4d"));
        assert!(!matches_session("4242.spmi-cal-1a2b3c4d", "spmi-cal"));
        assert!(matches_session("977.pts-0.host", "pts-0.host"));
    }

    #[test]
    fn test_session_names_are_unique() {
        let backend = ScreenBackend::new("spmi");
        let a = backend.session_name("cal");
        let b = backend.session_name("cal");
        assert!(a.starts_with("spmi-cal-"));
        assert_eq!(a.len(), "spmi-cal-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_spawn_args_keep_transcript() {
        let invocation = Invocation {
            program: "/usr/bin/spmi".to_string(),
            args: vec!["wrap".to_string(), "/r/cal".to_string()],
        };
        let args = spawn_args("spmi-cal-1a2b3c4d", Path::new("/r/cal/backend.log"), &invocation);
        assert_eq!(
            args,
            vec![
                "-L",
                "-Logfile",
                "/r/cal/backend.log",
                "-dmS",
                "spmi-cal-1a2b3c4d",
                "/usr/bin/spmi",
                "wrap",
                "/r/cal",
            ]
        );
    }

    #[test]
    fn test_escape_stuff() {
        assert_eq!(escape_stuff(r"a\b^c"), r"a\\b\^c");
        assert_eq!(escape_stuff("plain"), "plain");
    }
}
