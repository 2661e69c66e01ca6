//! Arena-backed Merkle tree handed to the scanner by the tree builder.
//!
//! Directories own their children through an ordered list of [`NodeId`]s;
//! the parent link is a plain index and never participates in ownership.
//! Breadth-first order, leaf counts and the identifier index are computed
//! once in [`TreeBuilder::build`] and are read-only afterwards.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};
use crate::model::identifier::Identifier;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Index of a node inside its [`MerkleTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Object kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Content,
    Directory,
}

impl NodeKind {
    /// Short tag used inside canonical identifiers.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Content => "cnt",
            Self::Directory => "dir",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cnt" => Some(Self::Content),
            "dir" => Some(Self::Directory),
            _ => None,
        }
    }
}

/// One file or directory of the scanned project.
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub name: String,
    /// Path relative to the scanned root, for reporting.
    pub path: PathBuf,
    pub identifier: Identifier,
    pub kind: NodeKind,
    pub depth: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl MerkleNode {
    pub const fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Serialized hand-off form of a tree: nested nodes with identifiers attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(alias = "swhid")]
    pub id: Identifier,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn content(name: impl Into<String>, id: Identifier) -> Self {
        Self {
            name: name.into(),
            id,
            kind: NodeKind::Content,
            children: Vec::new(),
        }
    }

    pub fn directory(name: impl Into<String>, id: Identifier, children: Vec<Self>) -> Self {
        Self {
            name: name.into(),
            id,
            kind: NodeKind::Directory,
            children,
        }
    }
}

// ---------------------------------------------------------------------------
// MerkleTree
// ---------------------------------------------------------------------------

/// Immutable tree of identified nodes rooted at [`MerkleTree::root`].
#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<MerkleNode>,
    bfs: Vec<NodeId>,
    leaf_counts: Vec<usize>,
    by_identifier: HashMap<Identifier, Vec<NodeId>>,
}

impl MerkleTree {
    /// Build a tree from its nested manifest form.
    pub fn from_spec(spec: &NodeSpec) -> Result<Self> {
        let mut builder = TreeBuilder::new(&spec.name, spec.id.clone(), spec.kind)?;
        let root = builder.root();
        let mut pending = vec![(root, spec)];
        while let Some((parent, node)) = pending.pop() {
            for child in &node.children {
                let id = builder.add_child(parent, &child.name, child.id.clone(), child.kind)?;
                pending.push((id, child));
            }
        }
        builder.build()
    }

    /// Read a JSON manifest from disk.
    pub fn load_manifest(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ScanError::io(path, source))?;
        let spec: NodeSpec = serde_json::from_str(&raw)?;
        Self::from_spec(&spec)
    }

    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &MerkleNode {
        &self.nodes[id.0]
    }

    pub fn identifier(&self, id: NodeId) -> &Identifier {
        &self.nodes[id.0].identifier
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind
    }

    pub fn is_directory(&self, id: NodeId) -> bool {
        self.nodes[id.0].is_directory()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Every node, root first, level by level, siblings by name.
    pub fn bfs_order(&self) -> &[NodeId] {
        &self.bfs
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    /// Strict descendants of `id` in breadth-first order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<NodeId> = self.children(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            queue.extend(self.children(next).iter().copied());
        }
        out
    }

    /// Whether `ancestor` lies strictly above `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// All nodes carrying `identifier` (identical subtrees share one).
    pub fn nodes_with(&self, identifier: &Identifier) -> &[NodeId] {
        self.by_identifier
            .get(identifier)
            .map_or(&[], Vec::as_slice)
    }

    pub fn distinct_identifiers(&self) -> usize {
        self.by_identifier.len()
    }

    /// Number of content nodes at or below `id`.
    pub fn leaf_count(&self, id: NodeId) -> usize {
        self.leaf_counts[id.0]
    }

    /// Whether a directory has at least one content node as a direct child.
    pub fn has_direct_contents(&self, id: NodeId) -> bool {
        self.children(id)
            .iter()
            .any(|child| !self.is_directory(*child))
    }

    pub fn content_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_directory()).count()
    }

    pub fn directory_count(&self) -> usize {
        self.nodes.len() - self.content_count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &MerkleNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}

// ---------------------------------------------------------------------------
// TreeBuilder
// ---------------------------------------------------------------------------

/// Incremental constructor for [`MerkleTree`].
#[derive(Debug)]
pub struct TreeBuilder {
    nodes: Vec<MerkleNode>,
    names: Vec<HashSet<String>>,
}

impl TreeBuilder {
    /// Start a tree with its root node.
    pub fn new(name: &str, identifier: Identifier, kind: NodeKind) -> Result<Self> {
        check_kind(&identifier, kind, name)?;
        Ok(Self {
            nodes: vec![MerkleNode {
                name: name.to_string(),
                path: PathBuf::from("."),
                identifier,
                kind,
                depth: 0,
                parent: None,
                children: Vec::new(),
            }],
            names: vec![HashSet::new()],
        })
    }

    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn add_content(&mut self, parent: NodeId, name: &str, id: Identifier) -> Result<NodeId> {
        self.add_child(parent, name, id, NodeKind::Content)
    }

    pub fn add_directory(&mut self, parent: NodeId, name: &str, id: Identifier) -> Result<NodeId> {
        self.add_child(parent, name, id, NodeKind::Directory)
    }

    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        identifier: Identifier,
        kind: NodeKind,
    ) -> Result<NodeId> {
        let Some(parent_node) = self.nodes.get(parent.0) else {
            return Err(ScanError::InvalidTree {
                details: format!("unknown parent node {}", parent.0),
            });
        };
        if !parent_node.is_directory() {
            return Err(ScanError::InvalidTree {
                details: format!("{} is a content node and cannot have children", parent_node.path.display()),
            });
        }
        if name.is_empty() || name.contains('/') {
            return Err(ScanError::InvalidTree {
                details: format!("invalid entry name {name:?} under {}", parent_node.path.display()),
            });
        }
        check_kind(&identifier, kind, name)?;
        if !self.names[parent.0].insert(name.to_string()) {
            return Err(ScanError::InvalidTree {
                details: format!("duplicate entry {name:?} under {}", parent_node.path.display()),
            });
        }

        let path = if parent.0 == 0 {
            PathBuf::from(name)
        } else {
            parent_node.path.join(name)
        };
        let depth = parent_node.depth + 1;
        let id = NodeId(self.nodes.len());
        self.nodes.push(MerkleNode {
            name: name.to_string(),
            path,
            identifier,
            kind,
            depth,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.names.push(HashSet::new());
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Freeze the tree: order children by name and precompute indexes.
    pub fn build(mut self) -> Result<MerkleTree> {
        let names: Vec<String> = self.nodes.iter().map(|n| n.name.clone()).collect();
        for node in &mut self.nodes {
            node.children.sort_by(|a, b| names[a.0].cmp(&names[b.0]));
        }

        let mut bfs = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([NodeId(0)]);
        while let Some(id) = queue.pop_front() {
            bfs.push(id);
            queue.extend(self.nodes[id.0].children.iter().copied());
        }

        let mut leaf_counts = vec![0_usize; self.nodes.len()];
        for id in bfs.iter().rev() {
            let node = &self.nodes[id.0];
            leaf_counts[id.0] = if node.is_directory() {
                node.children.iter().map(|c| leaf_counts[c.0]).sum()
            } else {
                1
            };
        }

        let mut by_identifier: HashMap<Identifier, Vec<NodeId>> = HashMap::new();
        for id in &bfs {
            let node = &self.nodes[id.0];
            by_identifier
                .entry(node.identifier.clone())
                .or_default()
                .push(*id);
        }
        for (identifier, ids) in &by_identifier {
            let kind = self.nodes[ids[0].0].kind;
            if let Some(other) = ids.iter().find(|id| self.nodes[id.0].kind != kind) {
                return Err(ScanError::InvalidTree {
                    details: format!(
                        "identifier {identifier} is used by both a content and a directory ({})",
                        self.nodes[other.0].path.display()
                    ),
                });
            }
        }

        Ok(MerkleTree {
            nodes: self.nodes,
            bfs,
            leaf_counts,
            by_identifier,
        })
    }
}

fn check_kind(identifier: &Identifier, kind: NodeKind, name: &str) -> Result<()> {
    match identifier.kind() {
        Some(declared) if declared != kind => Err(ScanError::InvalidTree {
            details: format!(
                "{name:?} is a {} but carries identifier {identifier}",
                kind.tag()
            ),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(kind: NodeKind, n: u8) -> Identifier {
        Identifier::from_digest(kind, &format!("{n:02x}").repeat(20))
    }

    fn sample() -> MerkleTree {
        let spec = NodeSpec::directory(
            "project",
            id(NodeKind::Directory, 1),
            vec![
                NodeSpec::content("z.txt", id(NodeKind::Content, 2)),
                NodeSpec::directory(
                    "src",
                    id(NodeKind::Directory, 3),
                    vec![
                        NodeSpec::content("main.rs", id(NodeKind::Content, 4)),
                        NodeSpec::content("lib.rs", id(NodeKind::Content, 5)),
                    ],
                ),
                NodeSpec::directory("empty", id(NodeKind::Directory, 6), vec![]),
            ],
        );
        MerkleTree::from_spec(&spec).expect("sample tree is valid")
    }

    fn names(tree: &MerkleTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|id| tree.node(*id).name.clone()).collect()
    }

    #[test]
    fn bfs_orders_levels_and_names() {
        let tree = sample();
        assert_eq!(
            names(&tree, tree.bfs_order()),
            vec!["project", "empty", "src", "z.txt", "lib.rs", "main.rs"]
        );
    }

    #[test]
    fn leaf_counts_and_paths() {
        let tree = sample();
        let root = tree.root();
        assert_eq!(tree.leaf_count(root), 3);
        let src = tree.children(root)[1];
        assert_eq!(tree.node(src).path, PathBuf::from("src"));
        assert_eq!(tree.leaf_count(src), 2);
        let empty = tree.children(root)[0];
        assert_eq!(tree.leaf_count(empty), 0);
        assert!(!tree.has_direct_contents(empty));
        assert!(tree.has_direct_contents(root));
        let lib = tree.children(src)[0];
        assert_eq!(tree.node(lib).path, PathBuf::from("src/lib.rs"));
        assert_eq!(tree.node(lib).depth, 2);
        assert_eq!(tree.content_count(), 3);
        assert_eq!(tree.directory_count(), 3);
    }

    #[test]
    fn ancestors_and_descendants() {
        let tree = sample();
        let root = tree.root();
        let src = tree.children(root)[1];
        let main = tree.children(src)[1];
        assert_eq!(tree.ancestors(main).collect::<Vec<_>>(), vec![src, root]);
        assert!(tree.is_ancestor(root, main));
        assert!(!tree.is_ancestor(main, root));
        assert_eq!(names(&tree, &tree.descendants(src)), vec!["lib.rs", "main.rs"]);
        assert_eq!(tree.descendants(root).len(), 5);
    }

    #[test]
    fn shared_identifiers_are_indexed_together() {
        let shared = id(NodeKind::Content, 9);
        let spec = NodeSpec::directory(
            "root",
            id(NodeKind::Directory, 1),
            vec![
                NodeSpec::content("a", shared.clone()),
                NodeSpec::content("b", shared.clone()),
            ],
        );
        let tree = MerkleTree::from_spec(&spec).unwrap();
        assert_eq!(tree.nodes_with(&shared).len(), 2);
        assert_eq!(tree.distinct_identifiers(), 2);
        assert!(tree.nodes_with(&id(NodeKind::Content, 42)).is_empty());
    }

    #[test]
    fn duplicate_names_rejected() {
        let spec = NodeSpec::directory(
            "root",
            id(NodeKind::Directory, 1),
            vec![
                NodeSpec::content("a", id(NodeKind::Content, 2)),
                NodeSpec::content("a", id(NodeKind::Content, 3)),
            ],
        );
        let err = MerkleTree::from_spec(&spec).unwrap_err();
        assert_eq!(err.code(), "KBS-1101");
    }

    #[test]
    fn content_cannot_have_children() {
        let mut builder = TreeBuilder::new("root", id(NodeKind::Directory, 1), NodeKind::Directory)
            .unwrap();
        let file = builder
            .add_content(builder.root(), "f", id(NodeKind::Content, 2))
            .unwrap();
        assert!(builder.add_content(file, "g", id(NodeKind::Content, 3)).is_err());
    }

    #[test]
    fn kind_mismatch_rejected() {
        let result = TreeBuilder::new("root", id(NodeKind::Content, 1), NodeKind::Directory);
        assert!(matches!(result, Err(ScanError::InvalidTree { .. })));
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let spec = NodeSpec::directory(
            "root",
            id(NodeKind::Directory, 1),
            vec![NodeSpec::content("a", id(NodeKind::Content, 2))],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        std::fs::write(&path, serde_json::to_string(&spec).unwrap()).unwrap();
        let tree = MerkleTree::load_manifest(&path).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.identifier(tree.root()), &spec.id);
    }
}
