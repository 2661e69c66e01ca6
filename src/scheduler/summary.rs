//! Scan-wide counters reported after a scan.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory classification tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCounts {
    pub fully_known: usize,
    pub partially_known: usize,
    pub unknown: usize,
    /// Leaf-less directories that never got a definite answer.
    pub undetermined: usize,
}

/// Content classification tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCounts {
    pub known: usize,
    pub unknown: usize,
    /// Errored or never resolved.
    pub undetermined: usize,
}

/// A node whose status could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErroredNode {
    pub identifier: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Counters and outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub policy: String,
    /// Requests dispatched to the archive; retries of the same batch excluded.
    pub batches_issued: usize,
    /// Distinct identifiers sent, each counted once.
    pub identifiers_queried: usize,
    /// Re-sends of a batch after a transient failure.
    pub retries: usize,
    /// Unresolved nodes covered by a known ancestor.
    pub nodes_pruned: usize,
    pub elapsed_ms: u64,
    /// The overall deadline stopped the scan before the policy was done.
    pub timed_out: bool,
    pub directories: DirectoryCounts,
    pub contents: ContentCounts,
    pub errored: Vec<ErroredNode>,
}

impl ScanSummary {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Some nodes could not be classified.
    pub fn is_partial(&self) -> bool {
        self.timed_out
            || !self.errored.is_empty()
            || self.contents.undetermined > 0
            || self.directories.undetermined > 0
    }
}
