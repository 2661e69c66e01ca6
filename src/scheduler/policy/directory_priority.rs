//! Directory-priority: bet on directories that hold files, deepest first.

use crate::model::tree::NodeId;
use crate::scheduler::policy::{ScanView, TraversalPolicy, any_pending, not_known_below};

/// Three phases, each started only once the previous one has no answer
/// outstanding:
/// 1. directories with direct content children, deepest first, skipping any
///    with a not-known directory beneath;
/// 2. directories without direct contents, skipping any with a not-known
///    node beneath;
/// 3. whatever contents are still uncovered.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryPriority;

impl TraversalPolicy for DirectoryPriority {
    fn name(&self) -> &'static str {
        "directory-priority"
    }

    fn next_batch(&self, view: &ScanView<'_>, batch_size: usize) -> Vec<NodeId> {
        let tree = view.tree();
        let holds_files = |node: NodeId| tree.is_directory(node) && tree.has_direct_contents(node);
        let bare_dir = |node: NodeId| tree.is_directory(node) && !tree.has_direct_contents(node);

        let dir_blocked = not_known_below(view, |node| tree.is_directory(node));
        let mut phase_one: Vec<NodeId> = tree
            .bfs_order()
            .iter()
            .copied()
            .filter(|node| holds_files(*node) && view.is_candidate(*node))
            .filter(|node| !dir_blocked[node.index()])
            .collect();
        if !phase_one.is_empty() {
            phase_one.sort_by_key(|node| std::cmp::Reverse(tree.node(*node).depth));
            phase_one.truncate(batch_size);
            return phase_one;
        }
        if any_pending(view, holds_files) {
            return Vec::new();
        }

        let blocked = not_known_below(view, |_| true);
        let phase_two: Vec<NodeId> = tree
            .bfs_order()
            .iter()
            .copied()
            .filter(|node| bare_dir(*node) && view.is_candidate(*node))
            .filter(|node| !blocked[node.index()])
            .take(batch_size)
            .collect();
        if !phase_two.is_empty() {
            return phase_two;
        }
        if any_pending(view, bare_dir) {
            return Vec::new();
        }

        tree.bfs_order()
            .iter()
            .copied()
            .filter(|node| !tree.is_directory(*node) && view.is_candidate(*node))
            .take(batch_size)
            .collect()
    }
}
