//! Existence-oracle contract consumed by the query scheduler.
//!
//! Transport, authentication and rate limiting live behind [`KbClient`]; the
//! scheduler only relies on batched membership answers and on the
//! transient/permanent split of [`KbError`].

#![allow(missing_docs)]

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::model::identifier::Identifier;

/// Per-call limits the scheduler promises to respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub max_batch: usize,
    pub timeout: Duration,
}

/// Answer for a single identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Present,
    Absent,
    /// Permanently refused (malformed, unsupported). Never retried.
    Rejected(String),
}

/// Answers for one request, keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchAnswer {
    entries: HashMap<Identifier, Lookup>,
}

impl BatchAnswer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identifier: Identifier, lookup: Lookup) {
        self.entries.insert(identifier, lookup);
    }

    pub fn get(&self, identifier: &Identifier) -> Option<&Lookup> {
        self.entries.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &Lookup)> {
        self.entries.iter()
    }

    /// Merge another answer in; later entries win.
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }
}

impl FromIterator<(Identifier, Lookup)> for BatchAnswer {
    fn from_iter<I: IntoIterator<Item = (Identifier, Lookup)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Failure of a whole `batch_exists` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KbError {
    /// Network or server-side trouble. Retryable.
    #[error("transient archive failure: {details}")]
    Transient { details: String },

    /// The call outlived its deadline. Retryable.
    #[error("archive call exceeded {limit_ms} ms (took {elapsed_ms} ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    /// One identifier poisoned the request. Only that identifier fails.
    #[error("archive rejected {identifier}: {reason}")]
    Rejected {
        identifier: Identifier,
        reason: String,
    },

    /// The request itself broke the client contract.
    #[error("batch of {size} identifiers exceeds the archive limit of {max}")]
    BatchTooLarge { size: usize, max: usize },
}

impl KbError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Batched set-membership oracle over canonical identifiers.
pub trait KbClient: Send + Sync {
    /// Ask which of `identifiers` the archive holds.
    ///
    /// Callers never pass more than `options.max_batch` identifiers.
    /// Implementations should honour `options.timeout` where their transport
    /// allows it; the scheduler also enforces it on the returned answer.
    fn batch_exists(
        &self,
        identifiers: &[Identifier],
        options: &QueryOptions,
    ) -> Result<BatchAnswer, KbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_split() {
        assert!(
            KbError::Transient {
                details: "503".to_string()
            }
            .is_transient()
        );
        assert!(
            KbError::Timeout {
                elapsed_ms: 40,
                limit_ms: 30
            }
            .is_transient()
        );
        assert!(
            !KbError::Rejected {
                identifier: Identifier::new("x"),
                reason: "malformed".to_string()
            }
            .is_transient()
        );
        assert!(!KbError::BatchTooLarge { size: 2, max: 1 }.is_transient());
    }

    #[test]
    fn answers_merge() {
        let a = Identifier::new("a");
        let b = Identifier::new("b");
        let mut first: BatchAnswer = [(a.clone(), Lookup::Absent)].into_iter().collect();
        let second: BatchAnswer = [(a.clone(), Lookup::Present), (b.clone(), Lookup::Absent)]
            .into_iter()
            .collect();
        first.extend(second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.get(&a), Some(&Lookup::Present));
        assert_eq!(first.get(&b), Some(&Lookup::Absent));
    }
}
