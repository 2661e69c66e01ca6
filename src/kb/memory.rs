//! In-process archive oracle backed by a set of known identifiers.
//!
//! Used by the benchmark command and by tests. Every call is recorded so the
//! number and content of round trips can be asserted afterwards, and faults
//! can be scripted to exercise the scheduler's retry path.

#![allow(missing_docs)]

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::errors::{Result, ScanError};
use crate::kb::client::{BatchAnswer, KbClient, KbError, Lookup, QueryOptions};
use crate::model::identifier::Identifier;

/// One `batch_exists` invocation as seen by the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub identifiers: Vec<Identifier>,
    pub failed: bool,
}

/// Set-backed [`KbClient`].
#[derive(Debug, Default)]
pub struct MemoryKb {
    known: HashSet<Identifier>,
    rejected: HashSet<Identifier>,
    latency: Duration,
    faults: Mutex<VecDeque<KbError>>,
    log: Mutex<Vec<CallRecord>>,
}

impl MemoryKb {
    pub fn new<I>(known: I) -> Self
    where
        I: IntoIterator<Item = Identifier>,
    {
        Self {
            known: known.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Load known identifiers from a kb-state file.
    ///
    /// Accepts either a JSON array of strings or one identifier per line
    /// (blank lines and `#` comments ignored).
    pub fn from_state_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ScanError::io(path, source))?;
        let trimmed = raw.trim_start();
        let known: Vec<Identifier> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)?
        } else {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(Identifier::new)
                .collect()
        };
        Ok(Self::new(known))
    }

    /// Identifiers the oracle refuses permanently.
    #[must_use]
    pub fn with_rejected<I>(mut self, rejected: I) -> Self
    where
        I: IntoIterator<Item = Identifier>,
    {
        self.rejected.extend(rejected);
        self
    }

    /// Sleep this long inside every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call fail with `error`. Faults are consumed in order.
    pub fn push_fault(&self, error: KbError) {
        self.faults.lock().push_back(error);
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.known.contains(identifier)
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    /// Every call, failed attempts included, in arrival order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.log.lock().clone()
    }

    /// Identifier lists of calls that returned an answer.
    pub fn answered_batches(&self) -> Vec<Vec<Identifier>> {
        self.log
            .lock()
            .iter()
            .filter(|call| !call.failed)
            .map(|call| call.identifiers.clone())
            .collect()
    }

    fn record(&self, identifiers: &[Identifier], failed: bool) {
        self.log.lock().push(CallRecord {
            identifiers: identifiers.to_vec(),
            failed,
        });
    }
}

impl KbClient for MemoryKb {
    fn batch_exists(
        &self,
        identifiers: &[Identifier],
        options: &QueryOptions,
    ) -> std::result::Result<BatchAnswer, KbError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if identifiers.len() > options.max_batch {
            self.record(identifiers, true);
            return Err(KbError::BatchTooLarge {
                size: identifiers.len(),
                max: options.max_batch,
            });
        }
        if let Some(fault) = self.faults.lock().pop_front() {
            self.record(identifiers, true);
            return Err(fault);
        }
        self.record(identifiers, false);

        Ok(identifiers
            .iter()
            .map(|id| {
                let lookup = if self.rejected.contains(id) {
                    Lookup::Rejected("identifier refused by archive".to_string())
                } else if !id.is_well_formed() {
                    Lookup::Rejected("malformed identifier".to_string())
                } else if self.known.contains(id) {
                    Lookup::Present
                } else {
                    Lookup::Absent
                };
                (id.clone(), lookup)
            })
            .collect())
    }
}
