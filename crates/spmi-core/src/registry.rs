//! The set of tracked resources.
//!
//! A [`Registry`] is an in-memory view rebuilt from the metadata root on
//! every invocation and discarded on exit. Entries are enumerated in id
//! order, which is also the order of bulk outcomes.

use crate::config::SpmiConfig;
use crate::descriptor::ResourceConfig;
use crate::error::{Result, SpmiError};
use crate::manageable::{Manageable, TaskState};
use crate::metadata::{MetadataEntry, ResourceLock, StoredDescriptor};
use crate::pattern::{BulkReport, PatternSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One row of `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRow {
    pub id: String,
    /// `None` when the backend could not be queried.
    pub state: Option<TaskState>,
    pub comment: String,
}

/// Tracked resources, keyed by id.
#[derive(Debug)]
pub struct Registry {
    config: Arc<SpmiConfig>,
    entries: BTreeMap<String, Manageable>,
}

impl Registry {
    /// Verify the root and scan it.
    pub fn open(config: SpmiConfig) -> Result<Self> {
        config.ensure_root()?;
        let config = Arc::new(config);
        let entries = scan(&config)?;
        debug!("Registry has {} resource(s)", entries.len());
        Ok(Self { config, entries })
    }

    pub fn config(&self) -> &SpmiConfig {
        &self.config
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Result<&Manageable> {
        self.entries.get(id).ok_or_else(|| SpmiError::NotFound {
            target: id.to_string(),
        })
    }

    /// Persist a new resource. Nothing is spawned.
    pub fn load(&mut self, record: ResourceConfig) -> Result<&Manageable> {
        record.validate()?;
        let id = record.id().to_string();

        if self.entries.contains_key(&id) {
            return Err(SpmiError::DuplicateId { id });
        }

        let _lock = ResourceLock::acquire(&self.config.locks_dir(), &id)?;
        let descriptor = StoredDescriptor::new(record);
        let entry = MetadataEntry::create(&self.config.root, &descriptor)?;
        let task = Manageable::new(self.config.clone(), entry, descriptor);

        info!("Loaded {}", id);
        Ok(self.entries.entry(id).or_insert(task))
    }

    /// Id, state and comment of every resource.
    pub fn list(&self) -> Vec<ListRow> {
        self.entries
            .values()
            .map(|task| ListRow {
                id: task.id().to_string(),
                state: task
                    .state()
                    .map_err(|e| warn!("Cannot determine state of {}: {}", task.id(), e))
                    .ok(),
                comment: task.comment().to_string(),
            })
            .collect()
    }

    /// Run `op` on every resource selected by `patterns`, in id order,
    /// without stopping at failures.
    pub fn apply<T>(
        &self,
        patterns: &[String],
        mut op: impl FnMut(&Manageable) -> Result<T>,
    ) -> Result<BulkReport<T>> {
        let selection = PatternSet::new(patterns)?.resolve(self.ids());
        for pattern in &selection.unmatched {
            info!("No resource matches '{}'", pattern);
        }

        let mut report = BulkReport::new(selection.unmatched);
        for id in selection.targets {
            let result = self.get(&id).and_then(&mut op);
            if let Err(e) = &result {
                debug!("{} failed: {}", id, e);
            }
            report.push(id, result);
        }
        Ok(report)
    }

    /// Bulk `clean`; cleaned resources leave the registry.
    pub fn clean(&mut self, patterns: &[String]) -> Result<BulkReport<()>> {
        let report = self.apply(patterns, Manageable::clean)?;
        for outcome in report.outcomes.iter().filter(|o| o.result.is_ok()) {
            self.entries.remove(&outcome.id);
        }
        Ok(report)
    }
}

/// Rebuild the view from the root: every visible directory with a readable
/// descriptor. Anything else is skipped with a warning.
fn scan(config: &Arc<SpmiConfig>) -> Result<BTreeMap<String, Manageable>> {
    let mut entries = BTreeMap::new();

    let dir = fs::read_dir(&config.root).map_err(|e| SpmiError::io_with_path(e, &config.root))?;
    for item in dir {
        let item = item.map_err(|e| SpmiError::io_with_path(e, &config.root))?;
        let name = item.file_name().to_string_lossy().into_owned();

        if name.starts_with('.') || !item.path().is_dir() {
            continue;
        }

        match Manageable::open(config.clone(), MetadataEntry::at(item.path())) {
            Ok(task) => {
                entries.insert(name, task);
            }
            Err(e) => warn!("Skipping {}: {}", item.path().display(), e),
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{parse_str, Format};
    use std::path::Path;
    use tempfile::TempDir;

    fn record(id: &str) -> ResourceConfig {
        parse_str(
            &format!(
                r#"{{"type":"task","id":"{}","comment":"c-{}","backend":{{"type":"local"}},
                    "wrapper":{{"type":"default","command":"true"}}}}"#,
                id, id
            ),
            Format::Json,
        )
        .unwrap()
    }

    fn open(root: &Path) -> Registry {
        Registry::open(SpmiConfig::new(root, "/nonexistent/spmi")).unwrap()
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_load_then_list_in_any_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = open(temp_dir.path());

        for id in ["web", "cal", "train-2", "train-1"] {
            registry.load(record(id)).unwrap();
        }

        // A fresh scan sees exactly the loaded ids, once each, sorted
        let registry = open(temp_dir.path());
        let rows = registry.list();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["cal", "train-1", "train-2", "web"]);
        assert!(rows.iter().all(|r| r.state == Some(TaskState::Inactive)));
        assert_eq!(rows[0].comment, "c-cal");
    }

    #[test]
    fn test_duplicate_load() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = open(temp_dir.path());
        registry.load(record("cal")).unwrap();

        assert!(matches!(
            registry.load(record("cal")),
            Err(SpmiError::DuplicateId { .. })
        ));

        // A stale view still cannot overwrite the entry on disk
        let mut stale = open(temp_dir.path());
        stale.entries.clear();
        assert!(matches!(
            stale.load(record("cal")),
            Err(SpmiError::DuplicateId { .. })
        ));
        assert_eq!(open(temp_dir.path()).len(), 1);
    }

    #[test]
    fn test_scan_skips_hidden_and_broken_entries() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = open(temp_dir.path());
        registry.load(record("good")).unwrap();

        fs::create_dir(temp_dir.path().join(".good.123.staging")).unwrap();
        fs::create_dir(temp_dir.path().join("no-descriptor")).unwrap();
        fs::write(temp_dir.path().join("stray-file"), "x").unwrap();

        let registry = open(temp_dir.path());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["good"]);
        assert!(matches!(
            registry.get("no-descriptor"),
            Err(SpmiError::NotFound { .. })
        ));
    }

    #[test]
    fn test_apply_continues_after_failures() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = open(temp_dir.path());
        for id in ["a", "b", "c"] {
            registry.load(record(id)).unwrap();
        }

        let report = registry
            .apply(&patterns(&["c", "a|b", "zzz"]), |task| {
                if task.id() == "b" {
                    task.stop()
                } else {
                    task.status().map(drop)
                }
            })
            .unwrap();

        let ids: Vec<_> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(matches!(
            report.outcomes[1].result,
            Err(SpmiError::NotActive { .. })
        ));
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.unmatched, vec!["zzz"]);
    }

    #[test]
    fn test_invalid_pattern_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = open(temp_dir.path());
        registry.load(record("a")).unwrap();

        assert!(matches!(
            registry.clean(&patterns(&[".*", "("])),
            Err(SpmiError::InvalidPattern { .. })
        ));
        assert!(temp_dir.path().join("a").is_dir());
    }

    #[test]
    fn test_bulk_clean_removes_entries() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = open(temp_dir.path());
        for id in ["a", "b"] {
            registry.load(record(id)).unwrap();
        }

        let report = registry.clean(&patterns(&[".*"])).unwrap();
        assert!(report.is_success());
        assert!(registry.is_empty());
        assert!(open(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_unwritable_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("file-root");
        fs::write(&root, "").unwrap();

        assert!(Registry::open(SpmiConfig::new(&root, "/nonexistent/spmi")).is_err());
    }
}
