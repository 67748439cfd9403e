//! Error types for SPMI.
//!
//! Every failure the core can report maps onto one [`ErrorKind`], which the
//! CLI uses both for rendering and for choosing the process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the SPMI core.
#[derive(Debug, Error)]
pub enum SpmiError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        /// Descriptor file the error came from, if any.
        path: Option<PathBuf>,
    },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    // Registry errors
    #[error("Resource already loaded: {id}")]
    DuplicateId { id: String },

    #[error("No resource matches: {target}")]
    NotFound { target: String },

    // State conflicts
    #[error("Resource is already active: {id}")]
    AlreadyActive { id: String },

    #[error("Resource is not active: {id}")]
    NotActive { id: String },

    #[error("Resource is busy (active), refusing to clean: {id}")]
    Busy { id: String },

    // External session/job manager errors
    #[error("Backend tool '{tool}' unavailable: {message}")]
    BackendUnavailable {
        tool: String,
        /// Diagnostic text of the tool, verbatim.
        message: String,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to lock {path}: {message}")]
    Lock { path: PathBuf, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SPMI operations.
pub type Result<T> = std::result::Result<T, SpmiError>;

/// Coarse classification of [`SpmiError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    DuplicateId,
    NotFound,
    StateConflict,
    BackendUnavailable,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::DuplicateId => "duplicate-id",
            ErrorKind::NotFound => "not-found",
            ErrorKind::StateConflict => "state-conflict",
            ErrorKind::BackendUnavailable => "backend-unavailable",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<std::io::Error> for SpmiError {
    fn from(err: std::io::Error) -> Self {
        SpmiError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SpmiError {
    fn from(err: serde_json::Error) -> Self {
        SpmiError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SpmiError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SpmiError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a configuration error without file context.
    pub fn config(message: impl Into<String>) -> Self {
        SpmiError::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpmiError::Config { .. }
            | SpmiError::InvalidPattern { .. }
            | SpmiError::Json { .. } => ErrorKind::Config,

            SpmiError::DuplicateId { .. } => ErrorKind::DuplicateId,

            SpmiError::NotFound { .. } => ErrorKind::NotFound,

            SpmiError::AlreadyActive { .. }
            | SpmiError::NotActive { .. }
            | SpmiError::Busy { .. } => ErrorKind::StateConflict,

            SpmiError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,

            SpmiError::Io { .. } | SpmiError::Lock { .. } | SpmiError::Other(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpmiError::AlreadyActive { id: "cal".into() };
        assert_eq!(err.to_string(), "Resource is already active: cal");
    }

    #[test]
    fn test_backend_message_is_verbatim() {
        let err = SpmiError::BackendUnavailable {
            tool: "screen".into(),
            message: "No such file or directory (os error 2)".into(),
        };
        assert!(err
            .to_string()
            .ends_with("No such file or directory (os error 2)"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(SpmiError::Busy { id: "a".into() }.kind(), ErrorKind::StateConflict);
        assert_eq!(
            SpmiError::InvalidPattern {
                pattern: "(".into(),
                message: "unclosed group".into()
            }
            .kind(),
            ErrorKind::Config
        );
        assert_eq!(
            SpmiError::from(std::io::Error::other("boom")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_state_conflicts() {
        for err in [
            SpmiError::AlreadyActive { id: "a".into() },
            SpmiError::NotActive { id: "a".into() },
            SpmiError::Busy { id: "a".into() },
        ] {
            assert_eq!(err.kind(), ErrorKind::StateConflict);
        }
        assert_eq!(SpmiError::DuplicateId { id: "a".into() }.kind(), ErrorKind::DuplicateId);
    }
}
