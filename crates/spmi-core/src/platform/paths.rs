//! Platform-specific path utilities.

use crate::config::PathsConfig;
use crate::error::{Result, SpmiError};
use std::path::PathBuf;

/// Default metadata root: `~/.spmi`.
pub fn default_root() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SpmiError::config("Could not determine home directory"))?;
    Ok(home.join(PathsConfig::DEFAULT_ROOT_DIR_NAME))
}

/// Shell used to interpret a wrapped command string.
pub fn command_shell() -> &'static str {
    "/bin/sh"
}
