use serde::{Deserialize, Serialize};

/// Key of a persisted tree-node record, allocated by the store.
pub type RecordKey = u64;

/// Path string of the root record, created lazily on first access.
pub const ROOT_PATH: &str = "/";

/// Display name of the root record.
pub const ROOT_NAME: &str = "Root";

/// Discriminant of a persisted tree-node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// An inferred intermediate grouping, not itself a known entity.
    Namespace,
    /// A node bound to a concrete discovered entity.
    Leaf,
}

/// One durable row of the tree-node table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: RecordKey,
    pub kind: RecordKind,
    pub name: String,
    /// Full path string, unique within the table.
    pub path: String,
    /// Reference into the external type store. Leaf records only.
    #[serde(default)]
    pub leaf_ref: Option<u64>,
    /// Child record keys, sorted ascending and free of duplicates.
    #[serde(default)]
    pub child_keys: Vec<RecordKey>,
}

impl NodeRecord {
    pub fn new(key: RecordKey, kind: RecordKind, name: &str, path: &str) -> Self {
        Self {
            key,
            kind,
            name: name.to_string(),
            path: path.to_string(),
            leaf_ref: None,
            child_keys: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.path == ROOT_PATH
    }

    /// Insert a child key, keeping the array sorted and duplicate free.
    /// Returns `false` when the key was already present.
    pub fn add_child_key(&mut self, key: RecordKey) -> bool {
        match self.child_keys.binary_search(&key) {
            Ok(_) => false,
            Err(index) => {
                self.child_keys.insert(index, key);
                true
            }
        }
    }

    /// Remove a child key. Returns `false` when the key was not present.
    pub fn remove_child_key(&mut self, key: RecordKey) -> bool {
        match self.child_keys.binary_search(&key) {
            Ok(index) => {
                self.child_keys.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Rewrite this record as a leaf bound to `leaf_ref`, preserving the key
    /// and the existing children.
    pub fn convert_to_leaf(&mut self, leaf_ref: u64) {
        self.kind = RecordKind::Leaf;
        self.leaf_ref = Some(leaf_ref);
    }

    /// Rewrite this record as a namespace, dropping the leaf binding.
    pub fn convert_to_namespace(&mut self) {
        self.kind = RecordKind::Namespace;
        self.leaf_ref = None;
    }
}
