//! Turns final node statuses into presentation-ready classifications.
//!
//! Everything here is a pure function of the tree and the status table: it
//! can be re-run at will and never mutates scheduler state.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::model::status::{Status, StatusTable};
use crate::model::tree::{MerkleTree, NodeId, NodeKind};
use crate::scheduler::summary::{ContentCounts, DirectoryCounts, ErroredNode, ScanSummary};

/// Classification of a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryClass {
    /// Matched directly, or every leaf below is known.
    FullyKnown,
    /// Some leaves known, some not (or not determined).
    PartiallyKnown,
    /// No known leaf.
    Unknown,
    /// Nothing below got a definite answer.
    Undetermined,
}

/// Leaf tallies and class of one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    pub class: DirectoryClass,
    pub known_percent: u8,
    pub known_leaves: usize,
    pub unknown_leaves: usize,
    /// Errored or unresolved leaves, left out of the percentage.
    pub undetermined_leaves: usize,
}

/// Per-node outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeClass {
    pub known: bool,
    /// Effective status: known when any ancestor matched.
    pub status: Status,
    pub directory: Option<DirectoryStats>,
}

/// Classification of every node, indexed by [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    nodes: Vec<NodeClass>,
}

impl Classification {
    pub fn node(&self, id: NodeId) -> &NodeClass {
        &self.nodes[id.index()]
    }

    pub fn known(&self, id: NodeId) -> bool {
        self.nodes[id.index()].known
    }

    /// `None` for content nodes.
    pub fn known_percent(&self, id: NodeId) -> Option<u8> {
        self.nodes[id.index()].directory.map(|d| d.known_percent)
    }

    pub fn directory(&self, id: NodeId) -> Option<&DirectoryStats> {
        self.nodes[id.index()].directory.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeClass> {
        self.nodes.iter()
    }

    /// `known` flag of every node in arena order.
    pub fn known_flags(&self) -> Vec<bool> {
        self.nodes.iter().map(|n| n.known).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    known: usize,
    unknown: usize,
    undetermined: usize,
    /// Descendant directories answered not-known.
    missing_dirs: usize,
    /// Leaf-less descendant directories not known to the archive.
    bare_gaps: usize,
}

impl Tally {
    const fn determined(self) -> usize {
        self.known + self.unknown
    }
}

/// Classify every node.
///
/// A directory is fully known when its own effective status is known, or
/// when it has leaves, all of them are known and no leaf-less directory
/// below it is missing or undetermined. Leaf-less directories can only be
/// classified by their own answer or a missing directory below.
pub fn classify(tree: &MerkleTree, statuses: &StatusTable) -> Classification {
    let effective = statuses.effective_all(tree);
    let mut tallies = vec![Tally::default(); tree.len()];

    for node in tree.bfs_order().iter().rev() {
        let tally = match tree.kind(*node) {
            NodeKind::Content => match effective[node.index()] {
                Status::Known => Tally {
                    known: 1,
                    ..Tally::default()
                },
                Status::NotKnown => Tally {
                    unknown: 1,
                    ..Tally::default()
                },
                Status::Errored | Status::Unresolved => Tally {
                    undetermined: 1,
                    ..Tally::default()
                },
            },
            NodeKind::Directory => {
                tree.children(*node)
                    .iter()
                    .fold(Tally::default(), |acc, child| {
                        let c = tallies[child.index()];
                        let status = effective[child.index()];
                        let directory = tree.is_directory(*child);
                        let missing = usize::from(directory && status == Status::NotKnown);
                        let gap = usize::from(
                            directory && tree.leaf_count(*child) == 0 && status != Status::Known,
                        );
                        Tally {
                            known: acc.known + c.known,
                            unknown: acc.unknown + c.unknown,
                            undetermined: acc.undetermined + c.undetermined,
                            missing_dirs: acc.missing_dirs + c.missing_dirs + missing,
                            bare_gaps: acc.bare_gaps + c.bare_gaps + gap,
                        }
                    })
            }
        };
        tallies[node.index()] = tally;
    }

    let nodes = tree
        .iter()
        .map(|(id, node)| {
            let status = effective[id.index()];
            if node.is_directory() {
                let stats = directory_stats(tree.leaf_count(id), status, tallies[id.index()]);
                NodeClass {
                    known: stats.class == DirectoryClass::FullyKnown,
                    status,
                    directory: Some(stats),
                }
            } else {
                NodeClass {
                    known: status == Status::Known,
                    status,
                    directory: None,
                }
            }
        })
        .collect();

    Classification { nodes }
}

fn directory_stats(leaves: usize, status: Status, tally: Tally) -> DirectoryStats {
    let class = if status == Status::Known {
        DirectoryClass::FullyKnown
    } else if leaves == 0 {
        // A missing descendant proves the directory itself is missing.
        if status == Status::NotKnown || tally.missing_dirs > 0 {
            DirectoryClass::Unknown
        } else {
            DirectoryClass::Undetermined
        }
    } else if tally.known > 0 && tally.unknown == 0 && tally.undetermined == 0 && tally.bare_gaps == 0 {
        DirectoryClass::FullyKnown
    } else if tally.known > 0 {
        DirectoryClass::PartiallyKnown
    } else if tally.unknown > 0 {
        DirectoryClass::Unknown
    } else {
        DirectoryClass::Undetermined
    };

    let known_percent = match class {
        DirectoryClass::FullyKnown => 100,
        DirectoryClass::Unknown | DirectoryClass::Undetermined => 0,
        DirectoryClass::PartiallyKnown => partial_percent(tally.known, tally.determined()),
    };

    DirectoryStats {
        class,
        known_percent,
        known_leaves: tally.known,
        unknown_leaves: tally.unknown,
        undetermined_leaves: tally.undetermined,
    }
}

/// Rounded share of known leaves, kept strictly between 0 and 100.
fn partial_percent(known: usize, determined: usize) -> u8 {
    if determined == 0 {
        return 1;
    }
    let rounded = (known * 100 + determined / 2) / determined;
    u8::try_from(rounded.clamp(1, 99)).unwrap_or(99)
}

/// Fill the classification counters and the errored list of `summary`.
pub fn summarize(tree: &MerkleTree, statuses: &StatusTable, summary: &mut ScanSummary) {
    let classification = classify(tree, statuses);
    let mut directories = DirectoryCounts::default();
    let mut contents = ContentCounts::default();

    for (class, (_, node)) in classification.iter().zip(tree.iter()) {
        match class.directory {
            Some(stats) => match stats.class {
                DirectoryClass::FullyKnown => directories.fully_known += 1,
                DirectoryClass::PartiallyKnown => directories.partially_known += 1,
                DirectoryClass::Unknown => directories.unknown += 1,
                DirectoryClass::Undetermined => directories.undetermined += 1,
            },
            None => match class.status {
                Status::Known => contents.known += 1,
                Status::NotKnown => contents.unknown += 1,
                Status::Errored | Status::Unresolved => contents.undetermined += 1,
            },
        }
        debug_assert_eq!(class.directory.is_some(), node.is_directory());
    }

    summary.directories = directories;
    summary.contents = contents;
    summary.errored = statuses
        .errored()
        .filter(|(id, _)| statuses.covering_ancestor(tree, *id).is_none())
        .map(|(id, reason)| {
            let node = tree.node(id);
            ErroredNode {
                identifier: node.identifier.to_string(),
                path: node.path.clone(),
                reason: reason.to_string(),
            }
        })
        .collect();
}
