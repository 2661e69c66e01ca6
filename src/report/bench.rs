//! Benchmark rows comparing traversal policies on one repository.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};
use crate::model::identifier::Identifier;
use crate::model::tree::MerkleTree;
use crate::scheduler::summary::ScanSummary;

/// Algorithm label of the lower-bound row.
pub const MINIMUM_ALGORITHM: &str = "min";

/// Describes the repository and archive snapshot a benchmark ran against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkMeta {
    pub repo_id: String,
    pub origin: String,
    pub commit: String,
    pub kb_state: String,
}

/// One line of benchmark output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkRow {
    pub repo_id: String,
    pub origin: String,
    pub commit: String,
    pub kb_state: String,
    /// Node count of the scanned tree.
    pub repo_size: usize,
    pub algorithm: String,
    /// Archive round trips; empty for the lower-bound row.
    pub kb_queries: Option<usize>,
    pub identifiers_queried: usize,
    pub elapsed_ms: u64,
}

impl BenchmarkRow {
    pub fn from_summary(meta: &BenchmarkMeta, tree: &MerkleTree, summary: &ScanSummary) -> Self {
        Self {
            repo_id: meta.repo_id.clone(),
            origin: meta.origin.clone(),
            commit: meta.commit.clone(),
            kb_state: meta.kb_state.clone(),
            repo_size: tree.len(),
            algorithm: summary.policy.clone(),
            kb_queries: Some(summary.batches_issued),
            identifiers_queried: summary.identifiers_queried,
            elapsed_ms: summary.elapsed_ms,
        }
    }

    /// Row for the omniscient lower bound computed by [`minimum_queries`].
    pub fn minimum(meta: &BenchmarkMeta, tree: &MerkleTree, identifiers: usize) -> Self {
        Self {
            repo_id: meta.repo_id.clone(),
            origin: meta.origin.clone(),
            commit: meta.commit.clone(),
            kb_state: meta.kb_state.clone(),
            repo_size: tree.len(),
            algorithm: MINIMUM_ALGORITHM.to_string(),
            kb_queries: None,
            identifiers_queried: identifiers,
            elapsed_ms: 0,
        }
    }
}

/// Write `rows` as CSV, optionally preceded by the header line.
pub fn write_csv<W: Write>(out: W, rows: &[BenchmarkRow], header: bool) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(header)
        .from_writer(out);
    for row in rows {
        writer.serialize(row).map_err(csv_error)?;
    }
    writer.flush().map_err(|e| ScanError::Serialization {
        context: "benchmark csv",
        details: e.to_string(),
    })
}

fn csv_error(error: csv::Error) -> ScanError {
    ScanError::Serialization {
        context: "benchmark csv",
        details: error.to_string(),
    }
}

/// Identifiers an oracle-aware policy would need to query to classify the
/// whole tree.
///
/// Counts the topmost known nodes, every not-known content and every
/// not-known leaf-less directory outside a known subtree whose own answer is
/// not implied by a not-known child. Shared identifiers are counted once.
pub fn minimum_queries<F>(tree: &MerkleTree, is_known: F) -> usize
where
    F: Fn(&Identifier) -> bool,
{
    if tree.is_empty() {
        return 0;
    }

    let mut needed: HashSet<&Identifier> = HashSet::new();
    let mut stack = vec![tree.root()];
    while let Some(node) = stack.pop() {
        let identifier = tree.identifier(node);
        if is_known(identifier) {
            needed.insert(identifier);
            continue;
        }
        let implied_missing = tree
            .children(node)
            .iter()
            .any(|child| !is_known(tree.identifier(*child)));
        if !tree.is_directory(node) || (tree.leaf_count(node) == 0 && !implied_missing) {
            needed.insert(identifier);
        }
        stack.extend(tree.children(node).iter().copied());
    }
    needed.len()
}
