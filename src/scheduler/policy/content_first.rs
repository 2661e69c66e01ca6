//! Content-first: ask about every file, infer directories afterwards.

use crate::model::status::Status;
use crate::model::tree::NodeId;
use crate::scheduler::policy::{ScanView, TraversalPolicy};

/// Queries all content nodes in breadth-first order and never probes a
/// directory that has content below it; those are classified from their
/// leaves. Leaf-less directories cannot be inferred that way, so the topmost
/// ones are queried once no content candidate is left.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentFirst;

impl TraversalPolicy for ContentFirst {
    fn name(&self) -> &'static str {
        "content-first"
    }

    fn next_batch(&self, view: &ScanView<'_>, batch_size: usize) -> Vec<NodeId> {
        let tree = view.tree();
        let order = tree.bfs_order();

        let contents: Vec<NodeId> = order
            .iter()
            .copied()
            .filter(|node| !tree.is_directory(*node) && view.is_candidate(*node))
            .take(batch_size)
            .collect();
        if !contents.is_empty() {
            return contents;
        }

        order
            .iter()
            .copied()
            .filter(|node| tree.is_directory(*node) && tree.leaf_count(*node) == 0)
            .filter(|node| view.is_candidate(*node))
            .filter(|node| {
                !tree.parent(*node).is_some_and(|parent| {
                    tree.leaf_count(parent) == 0 && view.status(parent) == Status::Unresolved
                })
            })
            .take(batch_size)
            .collect()
    }
}
