//! Seeded random order, the baseline other policies are measured against.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::model::tree::NodeId;
use crate::scheduler::policy::{ScanView, TraversalPolicy, not_known_below};

/// Visits nodes in a fixed pseudo-random permutation. Directories with a
/// not-known node beneath are skipped since their answer is already implied.
#[derive(Debug, Clone, Copy)]
pub struct RandomOrder {
    seed: u64,
}

impl RandomOrder {
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn permutation(&self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        order.shuffle(&mut rng);
        order
    }
}

impl TraversalPolicy for RandomOrder {
    fn name(&self) -> &'static str {
        "random"
    }

    fn next_batch(&self, view: &ScanView<'_>, batch_size: usize) -> Vec<NodeId> {
        let tree = view.tree();
        let blocked = not_known_below(view, |_| true);
        let bfs = tree.bfs_order();

        self.permutation(bfs.len())
            .into_iter()
            .map(|slot| bfs[slot])
            .filter(|node| view.is_candidate(*node))
            .filter(|node| !(tree.is_directory(*node) && blocked[node.index()]))
            .take(batch_size)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::model::status::Status;
    use crate::scheduler::policy::test_support::*;

    #[test]
    fn same_seed_same_order() {
        let tree = sample_tree();
        let effective = statuses(&tree, &[]);
        let queried = HashSet::new();
        let view = ScanView::new(&tree, &effective, &queried);
        let first = RandomOrder::new(42).next_batch(&view, 100);
        let second = RandomOrder::new(42).next_batch(&view, 100);
        assert_eq!(first, second);
        assert_eq!(first.len(), tree.len());
        let unique: HashSet<_> = first.iter().collect();
        assert_eq!(unique.len(), tree.len());
    }

    #[test]
    fn skips_directories_above_not_known_nodes() {
        let tree = sample_tree();
        let effective = statuses(&tree, &[("b.c", Status::NotKnown)]);
        let queried = HashSet::new();
        let view = ScanView::new(&tree, &effective, &queried);
        let mut proposed = names(&tree, &RandomOrder::new(7).next_batch(&view, 100));
        proposed.sort();
        assert_eq!(proposed, vec!["README", "a.c", "empty"]);
    }
}
