//! Metadata persistence.
//!
//! This module provides:
//! - Atomic artifact writes and write-once exit codes
//! - [`MetadataEntry`], the per-resource directory
//! - [`ResourceLock`], serializing transitions across invocations

mod atomic;
mod lock;
mod store;

pub use atomic::{atomic_write, atomic_write_json, read_json, read_text};
pub use lock::ResourceLock;
pub use store::{MetadataEntry, StoredDescriptor};
