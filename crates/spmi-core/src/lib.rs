//! SPMI Core - lifecycle management for shell commands run through external
//! session/job managers.
//!
//! Resources are loaded from configuration records into a metadata root,
//! then started, stopped, killed, inspected and cleaned. All durable state
//! lives in the metadata root; each invocation rebuilds a [`Registry`] view
//! from it.
//!
//! # Example
//!
//! ```rust,ignore
//! use spmi_core::{descriptor, Registry, SpmiConfig};
//!
//! fn main() -> spmi_core::Result<()> {
//!     let mut registry = Registry::open(SpmiConfig::from_env(None)?)?;
//!
//!     let record = descriptor::parse_file("cal.json".as_ref())?;
//!     registry.load(record)?.start()?;
//!
//!     let report = registry.apply(&[".*".to_string()], |task| task.status())?;
//!     for outcome in report.outcomes {
//!         println!("{}: {:?}", outcome.id, outcome.result.map(|s| s.state));
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod manageable;
pub mod metadata;
pub mod pattern;
pub mod platform;
pub mod registry;
pub mod wrapper;

// Re-export commonly used types
pub use backend::{Backend, Invocation, SessionBackend, StdinMode, Termination};
pub use config::{AppConfig, SpmiConfig};
pub use descriptor::{BackendConfig, ResourceConfig, WrapperConfig};
pub use error::{ErrorKind, Result, SpmiError};
pub use manageable::{Manageable, TaskState, TaskStatus};
pub use metadata::{MetadataEntry, StoredDescriptor};
pub use pattern::{BulkReport, BulkSummary, Outcome, PatternSet};
pub use registry::{ListRow, Registry};
pub use wrapper::Wrapper;
