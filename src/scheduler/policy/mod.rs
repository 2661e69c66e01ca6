//! Traversal policies: which nodes to ask the archive about next.
//!
//! A policy only reads a [`ScanView`] and proposes node ids. It never writes
//! status and never talks to the archive; the scheduler filters, dedupes and
//! chunks whatever it proposes. Every policy must eventually propose every
//! content node that is neither resolved nor covered by a known directory,
//! which is what makes final classifications policy-independent.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::identifier::Identifier;
use crate::model::status::Status;
use crate::model::tree::{MerkleTree, NodeId};

pub mod content_first;
pub mod directory_first;
pub mod directory_priority;
pub mod file_priority;
pub mod greedy_bfs;
pub mod random;

pub use content_first::ContentFirst;
pub use directory_first::DirectoryFirst;
pub use directory_priority::DirectoryPriority;
pub use file_priority::FilePriority;
pub use greedy_bfs::GreedyBfs;
pub use random::RandomOrder;

// ---------------------------------------------------------------------------
// ScanView
// ---------------------------------------------------------------------------

/// Read-only snapshot of scan state handed to a policy.
#[derive(Debug, Clone, Copy)]
pub struct ScanView<'a> {
    tree: &'a MerkleTree,
    effective: &'a [Status],
    queried: &'a HashSet<Identifier>,
}

impl<'a> ScanView<'a> {
    /// `effective` is indexed by [`NodeId::index`]; `queried` holds every
    /// identifier already dispatched, in flight or answered.
    pub fn new(
        tree: &'a MerkleTree,
        effective: &'a [Status],
        queried: &'a HashSet<Identifier>,
    ) -> Self {
        Self {
            tree,
            effective,
            queried,
        }
    }

    pub const fn tree(&self) -> &'a MerkleTree {
        self.tree
    }

    /// Effective status: known when any ancestor is known.
    pub fn status(&self, node: NodeId) -> Status {
        self.effective[node.index()]
    }

    /// Unresolved, not pruned, and its identifier never sent.
    pub fn is_candidate(&self, node: NodeId) -> bool {
        self.status(node) == Status::Unresolved
            && !self.queried.contains(self.tree.identifier(node))
    }

    /// Unresolved but its identifier is already on the wire.
    pub fn is_pending(&self, node: NodeId) -> bool {
        self.status(node) == Status::Unresolved
            && self.queried.contains(self.tree.identifier(node))
    }
}

/// Strategy choosing the next nodes to query.
pub trait TraversalPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Up to `batch_size` candidate nodes, most urgent first. Empty means
    /// nothing to propose right now: the scan ends once nothing is in flight.
    fn next_batch(&self, view: &ScanView<'_>, batch_size: usize) -> Vec<NodeId>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// For every node, whether some strict descendant matching `filter` is
/// effectively not known. A not-known descendant proves the node itself is
/// not known, so querying it would be wasted.
pub(crate) fn not_known_below<F>(view: &ScanView<'_>, filter: F) -> Vec<bool>
where
    F: Fn(NodeId) -> bool,
{
    let tree = view.tree();
    let mut below = vec![false; tree.len()];
    for node in tree.bfs_order().iter().rev() {
        below[node.index()] = tree.children(*node).iter().any(|child| {
            below[child.index()] || (filter(*child) && view.status(*child) == Status::NotKnown)
        });
    }
    below
}

/// Any node matching `filter` still waiting on an answer.
pub(crate) fn any_pending<F>(view: &ScanView<'_>, filter: F) -> bool
where
    F: Fn(NodeId) -> bool,
{
    view.tree()
        .bfs_order()
        .iter()
        .any(|node| filter(*node) && view.is_pending(*node))
}

// ---------------------------------------------------------------------------
// PolicyKind
// ---------------------------------------------------------------------------

/// Named policy selected at scan start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    DirectoryFirst,
    ContentFirst,
    GreedyBfs,
    FilePriority,
    DirectoryPriority,
    Random,
}

impl PolicyKind {
    pub const ALL: [Self; 6] = [
        Self::DirectoryFirst,
        Self::ContentFirst,
        Self::GreedyBfs,
        Self::FilePriority,
        Self::DirectoryPriority,
        Self::Random,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DirectoryFirst => "directory-first",
            Self::ContentFirst => "content-first",
            Self::GreedyBfs => "greedy-bfs",
            Self::FilePriority => "file-priority",
            Self::DirectoryPriority => "directory-priority",
            Self::Random => "random",
        }
    }

    /// Instantiate the policy. `seed` only matters for [`PolicyKind::Random`].
    pub fn build(self, seed: u64) -> Box<dyn TraversalPolicy> {
        match self {
            Self::DirectoryFirst => Box::new(DirectoryFirst),
            Self::ContentFirst => Box::new(ContentFirst),
            Self::GreedyBfs => Box::new(GreedyBfs),
            Self::FilePriority => Box::new(FilePriority),
            Self::DirectoryPriority => Box::new(DirectoryPriority),
            Self::Random => Box::new(RandomOrder::new(seed)),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown policy {s:?}, expected one of {}", names.join(", "))
            })
    }
}
