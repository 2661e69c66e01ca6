//! Per-node classification state.

#![allow(missing_docs)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::tree::{MerkleTree, NodeId};

/// Classification of one node against the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unresolved,
    Known,
    NotKnown,
    Errored,
}

impl Status {
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// Known or not known: the archive gave a definite answer.
    pub const fn is_determined(self) -> bool {
        matches!(self, Self::Known | Self::NotKnown)
    }
}

/// Own status of every node in a tree, indexed by [`NodeId`].
///
/// Transitions only leave `Unresolved`; every later write is refused. A node
/// under a known directory is reported known by [`StatusTable::effective`]
/// without its own slot ever being touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTable {
    own: Vec<Status>,
    reasons: HashMap<NodeId, String>,
}

impl StatusTable {
    pub fn new(tree: &MerkleTree) -> Self {
        Self {
            own: vec![Status::Unresolved; tree.len()],
            reasons: HashMap::new(),
        }
    }

    pub fn own(&self, id: NodeId) -> Status {
        self.own[id.index()]
    }

    /// Set a definite status. Returns `false` when the node was already resolved.
    pub fn resolve(&mut self, id: NodeId, status: Status) -> bool {
        let slot = &mut self.own[id.index()];
        if slot.is_resolved() || !status.is_resolved() {
            return false;
        }
        *slot = status;
        true
    }

    /// Mark a node errored and remember why.
    pub fn mark_errored(&mut self, id: NodeId, reason: impl Into<String>) -> bool {
        if !self.resolve(id, Status::Errored) {
            return false;
        }
        self.reasons.insert(id, reason.into());
        true
    }

    pub fn error_reason(&self, id: NodeId) -> Option<&str> {
        self.reasons.get(&id).map(String::as_str)
    }

    /// Nearest strict ancestor whose own status is known.
    pub fn covering_ancestor(&self, tree: &MerkleTree, id: NodeId) -> Option<NodeId> {
        tree.ancestors(id)
            .find(|ancestor| self.own(*ancestor) == Status::Known)
    }

    /// Own status, overridden to `Known` when any ancestor is known.
    pub fn effective(&self, tree: &MerkleTree, id: NodeId) -> Status {
        let own = self.own(id);
        if own == Status::Known || self.covering_ancestor(tree, id).is_some() {
            Status::Known
        } else {
            own
        }
    }

    /// Unresolved itself but covered by a known ancestor.
    pub fn is_pruned(&self, tree: &MerkleTree, id: NodeId) -> bool {
        self.own(id) == Status::Unresolved && self.covering_ancestor(tree, id).is_some()
    }

    /// Effective status of every node in one top-down pass.
    pub fn effective_all(&self, tree: &MerkleTree) -> Vec<Status> {
        let mut out = vec![Status::Unresolved; tree.len()];
        for id in tree.bfs_order() {
            let inherited = tree
                .parent(*id)
                .is_some_and(|parent| out[parent.index()] == Status::Known);
            out[id.index()] = if inherited {
                Status::Known
            } else {
                self.own(*id)
            };
        }
        out
    }

    /// Number of nodes whose own status equals `status`.
    pub fn count(&self, status: Status) -> usize {
        self.own.iter().filter(|s| **s == status).count()
    }

    /// Nodes currently carrying an error, in arena order.
    pub fn errored(&self) -> impl Iterator<Item = (NodeId, &str)> {
        let mut ids: Vec<&NodeId> = self.reasons.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| (*id, self.reasons[id].as_str()))
    }
}
