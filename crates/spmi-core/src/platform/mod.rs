//! Platform abstraction layer.
//!
//! All OS-specific process and path handling lives here. SPMI drives
//! UNIX session managers, so only unix targets are supported.
//!
//! - `paths` - Default metadata root and the command shell
//! - `process` - Liveness checks, signals, bounded polling

pub mod paths;
pub mod process;

pub use paths::{command_shell, default_root};
pub use process::{
    exit_code_of, is_process_alive, process_start_time, send_signal, signal_group, wait_until,
};
