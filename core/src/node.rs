use crate::error::{Result, TreeError};
use crate::path::SymbolPath;
use classtree_record_store::{NodeRecord, RecordKey, RecordKind};
use std::cmp::Ordering;

/// Identifier of a live tree node. Nodes share their record's key.
pub type NodeId = RecordKey;

/// Closed variant tag for live tree nodes. Every operation site matches on
/// this tag instead of performing type tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Namespace,
    Leaf,
}

/// In-memory tree node: one record's worth of durable state plus transient
/// widget state (parent link, lazily materialized child list).
#[derive(Debug, Clone)]
pub struct TreeNode {
    key: NodeId,
    kind: NodeKind,
    name: String,
    path: SymbolPath,
    leaf_ref: Option<u64>,
    parent: Option<NodeId>,
    /// `None` until the child list has been materialized from the store.
    /// Once loaded, kept sorted by child name.
    children: Option<Vec<NodeId>>,
}

impl TreeNode {
    pub(crate) fn root(record: &NodeRecord) -> Self {
        Self {
            key: record.key,
            kind: NodeKind::Root,
            name: record.name.clone(),
            path: SymbolPath::root(),
            leaf_ref: None,
            parent: None,
            children: None,
        }
    }

    pub(crate) fn from_record(record: &NodeRecord, parent: Option<NodeId>) -> Result<Self> {
        if record.is_root() {
            return Err(TreeError::ConsistencyViolation(
                "root record resolved as a child".to_string(),
            ));
        }
        let kind = match record.kind {
            RecordKind::Namespace => NodeKind::Namespace,
            RecordKind::Leaf => NodeKind::Leaf,
        };
        Ok(Self {
            key: record.key,
            kind,
            name: record.name.clone(),
            path: SymbolPath::parse(&record.path),
            leaf_ref: record.leaf_ref,
            parent,
            children: None,
        })
    }

    pub fn key(&self) -> NodeId {
        self.key
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &SymbolPath {
        &self.path
    }

    pub fn leaf_ref(&self) -> Option<u64> {
        self.leaf_ref
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Whether the child list has been materialized from the store.
    pub fn is_materialized(&self) -> bool {
        self.children.is_some()
    }

    /// Materialized children in ascending name order, or `None` when the
    /// list has not been loaded yet.
    pub fn children(&self) -> Option<&[NodeId]> {
        self.children.as_deref()
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn set_children(&mut self, children: Vec<NodeId>) {
        self.children = Some(children);
    }

    pub(crate) fn mark_materialized(&mut self) {
        if self.children.is_none() {
            self.children = Some(Vec::new());
        }
    }

    pub(crate) fn insert_child_at(&mut self, index: usize, child: NodeId) {
        if let Some(children) = self.children.as_mut() {
            children.insert(index, child);
        }
    }

    pub(crate) fn remove_child_at(&mut self, index: usize) {
        if let Some(children) = self.children.as_mut() {
            children.remove(index);
        }
    }

    pub(crate) fn convert_to_leaf(&mut self, leaf_ref: u64) {
        self.kind = NodeKind::Leaf;
        self.leaf_ref = Some(leaf_ref);
    }

    pub(crate) fn convert_to_namespace(&mut self) {
        self.kind = NodeKind::Namespace;
        self.leaf_ref = None;
    }

    pub(crate) fn set_leaf_ref(&mut self, leaf_ref: u64) {
        self.leaf_ref = Some(leaf_ref);
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for TreeNode {}

impl PartialOrd for TreeNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.key.cmp(&other.key))
    }
}
