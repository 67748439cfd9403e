//! Configuration records and descriptor files.
//!
//! A descriptor is a JSON, TOML or YAML file holding one resource record:
//!
//! ```json
//! {
//!   "type": "task",
//!   "id": "cal",
//!   "comment": "print a calendar",
//!   "backend": { "type": "screen" },
//!   "wrapper": { "type": "default", "command": "cal", "mixed_stdout": true }
//! }
//! ```
//!
//! Every `type` tag is resolved against a closed set of variants; an unknown
//! tag is a configuration error.

use crate::error::{Result, SpmiError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Longest accepted resource id, in bytes.
pub const MAX_ID_LEN: usize = 128;

/// File extensions recognized as descriptors.
pub const DESCRIPTOR_EXTENSIONS: &[&str] = &["json", "toml", "yaml", "yml"];

/// A resource configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceConfig {
    /// A single shell command run through a backend.
    Task(TaskConfig),
}

/// Configuration of a task resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    #[serde(default)]
    pub comment: String,
    pub backend: BackendConfig,
    pub wrapper: WrapperConfig,
}

/// Backend selection and backend-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// GNU screen sessions.
    Screen(ScreenConfig),
    /// Slurm batch jobs.
    Slurm(SlurmConfig),
    /// Detached local process, no external manager.
    Local(LocalConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenConfig {
    /// Prefix of generated session names (`spmi` when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlurmConfig {
    /// Extra `sbatch` options, passed through as separate arguments.
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {}

/// Wrapper selection and wrapper-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WrapperConfig {
    Default(DefaultWrapperConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultWrapperConfig {
    /// Command line handed to `/bin/sh -c`.
    pub command: String,
    /// Send stderr to the stdout artifact instead of `output.err`.
    #[serde(default = "default_mixed_stdout")]
    pub mixed_stdout: bool,
}

fn default_mixed_stdout() -> bool {
    true
}

impl ResourceConfig {
    pub fn id(&self) -> &str {
        match self {
            ResourceConfig::Task(task) => &task.id,
        }
    }

    pub fn comment(&self) -> &str {
        match self {
            ResourceConfig::Task(task) => &task.comment,
        }
    }

    /// Type tag of the resource.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceConfig::Task(_) => "task",
        }
    }

    pub fn backend(&self) -> &BackendConfig {
        match self {
            ResourceConfig::Task(task) => &task.backend,
        }
    }

    pub fn wrapper(&self) -> &WrapperConfig {
        match self {
            ResourceConfig::Task(task) => &task.wrapper,
        }
    }

    /// Check the fields serde cannot check.
    pub fn validate(&self) -> Result<()> {
        validate_id(self.id())?;

        match self.wrapper() {
            WrapperConfig::Default(wrapper) if wrapper.command.trim().is_empty() => {
                Err(SpmiError::config(format!(
                    "Resource '{}' has an empty command",
                    self.id()
                )))
            }
            WrapperConfig::Default(_) => Ok(()),
        }
    }
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Screen(_) => "screen",
            BackendConfig::Slurm(_) => "slurm",
            BackendConfig::Local(_) => "local",
        }
    }
}

/// Ids name directories under the metadata root: non-empty, not hidden,
/// no path separators.
pub fn validate_id(id: &str) -> Result<()> {
    let valid_char = |c: char| c.is_ascii_alphanumeric() || "_.@+-".contains(c);

    let problem = if id.is_empty() {
        Some("id is empty")
    } else if id.len() > MAX_ID_LEN {
        Some("id is too long")
    } else if !id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        Some("id must start with a letter or digit")
    } else if !id.chars().all(valid_char) {
        Some("id may only contain letters, digits and _ . @ + -")
    } else {
        None
    };

    match problem {
        Some(message) => Err(SpmiError::config(format!("Invalid id '{}': {}", id, message))),
        None => Ok(()),
    }
}

/// Descriptor encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
    Yaml,
}

impl Format {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "toml" => Some(Format::Toml),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }
}

/// Decode and validate a record.
pub fn parse_str(contents: &str, format: Format) -> Result<ResourceConfig> {
    let record: ResourceConfig = match format {
        Format::Json => serde_json::from_str(contents).map_err(|e| SpmiError::config(e.to_string()))?,
        Format::Toml => toml::from_str(contents).map_err(|e| SpmiError::config(e.to_string()))?,
        Format::Yaml => {
            serde_yaml::from_str(contents).map_err(|e| SpmiError::config(e.to_string()))?
        }
    };

    record.validate()?;
    Ok(record)
}

/// Read, decode and validate a descriptor file.
pub fn parse_file(path: &Path) -> Result<ResourceConfig> {
    let with_path = |err: SpmiError| match err {
        SpmiError::Config { message, .. } => SpmiError::Config {
            message,
            path: Some(path.to_path_buf()),
        },
        other => other,
    };

    let format = Format::from_path(path).ok_or_else(|| SpmiError::Config {
        message: format!(
            "Unsupported descriptor extension (expected one of: {})",
            DESCRIPTOR_EXTENSIONS.join(", ")
        ),
        path: Some(path.to_path_buf()),
    })?;

    let contents = fs::read_to_string(path).map_err(|e| SpmiError::io_with_path(e, path))?;
    debug!("Parsing descriptor {}", path.display());

    parse_str(&contents, format).map_err(with_path)
}

/// Expand load arguments: files are kept as given, directories are walked
/// for descriptor files in sorted order.
pub fn collect_descriptor_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut result = Vec::new();

    for path in paths {
        if !path.is_dir() {
            result.push(path.clone());
            continue;
        }

        let mut found: Vec<PathBuf> = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| Format::from_path(p).is_some())
            .collect();

        debug!(
            "Found {} descriptor(s) under {}",
            found.len(),
            path.display()
        );
        result.append(&mut found);
    }

    result
}
