//! Pattern selection and bulk outcome aggregation.
//!
//! Every pattern must match a whole id. The empty pattern therefore selects
//! nothing (ids are never empty); `.*` selects everything.

use crate::error::{Result, SpmiError};
use regex::Regex;
use serde::Serialize;

/// A compiled list of id patterns.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<(String, Regex)>,
}

impl PatternSet {
    /// Compile every pattern, failing on the first invalid one.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let source = p.as_ref();
                let invalid = |e: regex::Error| SpmiError::InvalidPattern {
                    pattern: source.to_string(),
                    message: e.to_string(),
                };
                // Validate on its own first: an unbalanced group could
                // otherwise close the anchoring group early.
                Regex::new(source).map_err(invalid)?;
                Regex::new(&format!("^(?:{})$", source))
                    .map(|re| (source.to_string(), re))
                    .map_err(invalid)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// Whether any pattern fully matches `id`.
    pub fn matches(&self, id: &str) -> bool {
        self.patterns.iter().any(|(_, re)| re.is_match(id))
    }

    /// Select targets from `ids`, keeping their order and dropping
    /// duplicates. Patterns that select nothing are returned separately.
    pub fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Selection {
        let ids: Vec<&str> = ids.into_iter().collect();

        let mut targets = Vec::new();
        for &id in &ids {
            if self.matches(id) && !targets.iter().any(|t: &String| t == id) {
                targets.push(id.to_string());
            }
        }

        let mut unmatched: Vec<String> = Vec::new();
        for (source, re) in &self.patterns {
            if !ids.iter().any(|id| re.is_match(id)) && !unmatched.contains(source) {
                unmatched.push(source.clone());
            }
        }

        Selection { targets, unmatched }
    }
}

/// Result of [`PatternSet::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub targets: Vec<String>,
    pub unmatched: Vec<String>,
}

/// Outcome of one target of a bulk command.
#[derive(Debug)]
pub struct Outcome<T> {
    pub id: String,
    pub result: Result<T>,
}

/// Per-target outcomes of a bulk command, in registry order.
#[derive(Debug)]
pub struct BulkReport<T> {
    pub outcomes: Vec<Outcome<T>>,
    /// Patterns that selected nothing. Reported, but not failures.
    pub unmatched: Vec<String>,
}

impl<T> BulkReport<T> {
    pub fn new(unmatched: Vec<String>) -> Self {
        Self {
            outcomes: Vec::new(),
            unmatched,
        }
    }

    pub fn push(&mut self, id: impl Into<String>, result: Result<T>) {
        self.outcomes.push(Outcome {
            id: id.into(),
            result,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Aggregate counts, e.g. for machine-readable summaries.
    pub fn summary(&self) -> BulkSummary {
        BulkSummary {
            targets: self.outcomes.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            unmatched: self.unmatched.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub targets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unmatched: Vec<String>,
}
