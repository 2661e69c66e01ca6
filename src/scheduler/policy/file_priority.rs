//! File-priority: files deepest-first, then the directories they vouch for.

use crate::model::tree::NodeId;
use crate::scheduler::policy::{ScanView, TraversalPolicy, any_pending, not_known_below};

/// Contents are queried first, deepest paths leading. Once every content
/// has an answer, only the topmost directories with no not-known node
/// beneath them are probed; any directory above a not-known node is
/// not known by construction and is never asked about.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePriority;

impl TraversalPolicy for FilePriority {
    fn name(&self) -> &'static str {
        "file-priority"
    }

    fn next_batch(&self, view: &ScanView<'_>, batch_size: usize) -> Vec<NodeId> {
        let tree = view.tree();

        let mut contents: Vec<NodeId> = tree
            .bfs_order()
            .iter()
            .copied()
            .filter(|node| !tree.is_directory(*node) && view.is_candidate(*node))
            .collect();
        if !contents.is_empty() {
            contents.sort_by_key(|node| std::cmp::Reverse(tree.node(*node).depth));
            contents.truncate(batch_size);
            return contents;
        }
        if any_pending(view, |node| !tree.is_directory(node)) {
            return Vec::new();
        }

        let blocked = not_known_below(view, |_| true);
        let eligible = |node: NodeId| {
            tree.is_directory(node) && view.is_candidate(node) && !blocked[node.index()]
        };
        tree.bfs_order()
            .iter()
            .copied()
            .filter(|node| eligible(*node))
            .filter(|node| !tree.parent(*node).is_some_and(|parent| eligible(parent)))
            .take(batch_size)
            .collect()
    }
}
