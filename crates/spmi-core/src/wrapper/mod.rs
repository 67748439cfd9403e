//! Command wrappers.
//!
//! A wrapper turns the user's command string into the invocation a backend
//! runs inside its session. The invocation re-enters the `spmi` binary
//! through the hidden `wrap` subcommand, which runs [`supervisor::run`].

pub mod supervisor;

use crate::backend::{Invocation, StdinMode};
use crate::config::AppConfig;
use crate::descriptor::WrapperConfig;
use crate::metadata::MetadataEntry;
use std::path::Path;

/// The closed set of wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wrapper {
    Default(DefaultWrapper),
}

/// Runs the command through `/bin/sh -c`, capturing output to the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultWrapper {
    pub command: String,
    pub mixed_stdout: bool,
}

impl Wrapper {
    pub fn from_config(config: &WrapperConfig) -> Self {
        match config {
            WrapperConfig::Default(default) => Wrapper::Default(DefaultWrapper {
                command: default.command.clone(),
                mixed_stdout: default.mixed_stdout,
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Wrapper::Default(_) => "default",
        }
    }

    pub fn command(&self) -> &str {
        match self {
            Wrapper::Default(w) => &w.command,
        }
    }

    pub fn mixed_stdout(&self) -> bool {
        match self {
            Wrapper::Default(w) => w.mixed_stdout,
        }
    }

    /// `<program> wrap <entry> --stdin <mode>`
    pub fn invocation(&self, program: &Path, entry: &MetadataEntry, stdin: StdinMode) -> Invocation {
        Invocation {
            program: program.to_string_lossy().into_owned(),
            args: vec![
                AppConfig::WRAP_SUBCOMMAND.to_string(),
                entry.path().to_string_lossy().into_owned(),
                "--stdin".to_string(),
                stdin.as_str().to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DefaultWrapperConfig;

    #[test]
    fn test_invocation() {
        let wrapper = Wrapper::from_config(&WrapperConfig::Default(DefaultWrapperConfig {
            command: "cal".to_string(),
            mixed_stdout: false,
        }));
        assert_eq!(wrapper.kind(), "default");
        assert_eq!(wrapper.command(), "cal");
        assert!(!wrapper.mixed_stdout());

        let entry = MetadataEntry::at("/var/spmi/cal");
        let invocation = wrapper.invocation(Path::new("/usr/bin/spmi"), &entry, StdinMode::Fifo);

        assert_eq!(
            invocation.argv(),
            vec!["/usr/bin/spmi", "wrap", "/var/spmi/cal", "--stdin", "fifo"]
        );
    }
}
