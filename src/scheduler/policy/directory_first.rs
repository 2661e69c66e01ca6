//! Directory-first: probe the root, then open only directories the archive
//! does not hold, one level at a time.

use std::collections::VecDeque;

use crate::model::status::Status;
use crate::model::tree::NodeId;
use crate::scheduler::policy::{ScanView, TraversalPolicy};

/// Breadth-first descent through not-known directories.
///
/// A single hit on a directory covers its whole subtree, so large vendored
/// or copied trees cost one query. Errored directories are opened as well:
/// their children may still get a definite answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryFirst;

impl TraversalPolicy for DirectoryFirst {
    fn name(&self) -> &'static str {
        "directory-first"
    }

    fn next_batch(&self, view: &ScanView<'_>, batch_size: usize) -> Vec<NodeId> {
        let tree = view.tree();
        let mut batch = Vec::new();
        let mut queue = VecDeque::from([tree.root()]);

        while let Some(node) = queue.pop_front() {
            if view.is_candidate(node) {
                batch.push(node);
                if batch.len() >= batch_size {
                    break;
                }
                continue;
            }
            let open = matches!(view.status(node), Status::NotKnown | Status::Errored);
            if open && tree.is_directory(node) {
                queue.extend(tree.children(node).iter().copied());
            }
        }
        batch
    }
}
