use crate::error::{Result, TreeError};
use crate::node::{NodeId, NodeKind, TreeNode};
use crate::path::SymbolPath;
use crate::source::{EntitySource, TypeEntity};
use classtree_record_store::{NodeRecord, RecordKey, RecordKind, RecordStore, RecordStoreError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mediator between the record store and live tree nodes for one source.
///
/// Owns the path index and the node arena behind a single lock, so no two
/// structural mutations ever interleave. Record-level writes additionally go
/// through the store's own transaction framing, because lazy child
/// generation may touch the store outside the mutation queue.
pub struct TreeNodeManager {
    source_name: String,
    store: Arc<RecordStore>,
    source: Arc<dyn EntitySource>,
    state: Mutex<TreeState>,
}

struct TreeState {
    nodes: HashMap<NodeId, TreeNode>,
    path_index: HashMap<SymbolPath, NodeId>,
    root: Option<NodeId>,
}

impl TreeNodeManager {
    pub fn new(store: Arc<RecordStore>, source: Arc<dyn EntitySource>) -> Self {
        let state = TreeState {
            nodes: HashMap::new(),
            path_index: HashMap::with_capacity(source.type_count()),
            root: None,
        };
        Self {
            source_name: source.name().to_string(),
            store,
            source,
            state: Mutex::new(state),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The root node, materialized from its record on first access.
    pub fn root(&self) -> Result<NodeId> {
        let mut state = self.lock_state();
        let result = self.ensure_root(&mut state);
        self.report(result)
    }

    /// Snapshot of a live node, or `None` when it is not materialized.
    pub fn node(&self, id: NodeId) -> Option<TreeNode> {
        self.lock_state().nodes.get(&id).cloned()
    }

    /// Currently indexed node for `path`, if any.
    pub fn lookup(&self, path: &SymbolPath) -> Option<NodeId> {
        self.lock_state().path_index.get(path).copied()
    }

    /// Merge a newly discovered entity into the hierarchy.
    ///
    /// Idempotent: a second insertion of the same leaf path logs a warning
    /// and changes nothing. A namespace already occupying the path is
    /// converted in place into a leaf, preserving its key and children.
    pub fn add_entity(&self, entity: &TypeEntity) -> Result<()> {
        let mut state = self.lock_state();
        let result = self.add_entity_locked(&mut state, entity);
        self.report(result)
    }

    /// Leaf node for `entity`, indexing it first when absent.
    pub fn get_node(&self, entity: &TypeEntity) -> Result<NodeId> {
        let mut state = self.lock_state();
        let result = self.get_node_locked(&mut state, entity);
        self.report(result)
    }

    /// Remove the leaf indexed for `entity`.
    ///
    /// A target that is absent, or whose stored name no longer matches the
    /// entity's current name, is an expected event race and is ignored.
    /// Namespace ancestors are never pruned, even when left childless.
    pub fn remove_entity(&self, entity: &TypeEntity) -> Result<()> {
        let mut state = self.lock_state();
        let result = self.remove_entity_locked(&mut state, entity);
        self.report(result)
    }

    /// Rebind the leaf indexed for `entity` to the entity's current store
    /// reference.
    pub fn update_entity(&self, entity: &TypeEntity) -> Result<()> {
        let mut state = self.lock_state();
        let result = self.update_entity_locked(&mut state, entity);
        self.report(result)
    }

    /// Materialize the children of `id` from its persisted child-key array,
    /// in ascending name order.
    ///
    /// The fetch loop checks `token` on every iteration and aborts with
    /// [`TreeError::Cancelled`] before any state is touched.
    pub fn generate_children(
        &self,
        id: NodeId,
        token: &CancellationToken,
    ) -> Result<Vec<NodeId>> {
        let mut state = self.lock_state();
        let result = self.generate_children_locked(&mut state, id, token);
        self.report(result)
    }

    /// Discard the path index and every materialized child list, keeping
    /// only persisted records. Subsequent expansions re-derive structure
    /// lazily from the store.
    pub fn invalidate(&self) {
        let mut state = self.lock_state();
        info!(source = %self.source_name, "discarding in-memory tree index");
        state.nodes.clear();
        state.path_index.clear();
        state.root = None;
    }

    fn lock_state(&self) -> MutexGuard<'_, TreeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(TreeError::Store(err)) = &result {
            self.source.db_error(err);
        }
        result
    }

    fn ensure_root(&self, state: &mut TreeState) -> Result<NodeId> {
        if let Some(root) = state.root {
            return Ok(root);
        }
        let record = self.store.root_record()?;
        state.nodes.insert(record.key, TreeNode::root(&record));
        state.root = Some(record.key);
        Ok(record.key)
    }

    fn add_entity_locked(&self, state: &mut TreeState, entity: &TypeEntity) -> Result<()> {
        if entity.path.is_root() {
            return Err(TreeError::ConsistencyViolation(
                "entity path has no segments".to_string(),
            ));
        }
        let root = self.ensure_root(state)?;
        if let Some(&existing) = state.path_index.get(&entity.path) {
            return match state.nodes.get(&existing).map(TreeNode::kind) {
                Some(NodeKind::Leaf) => {
                    warn!("node for {} already exists", entity.path);
                    Ok(())
                }
                Some(NodeKind::Namespace) => self.convert_to_leaf(state, existing, entity),
                _ => Err(TreeError::ConsistencyViolation(format!(
                    "path index entry for {} does not resolve to a live node",
                    entity.path
                ))),
            };
        }

        let mut cursor = entity.path.parent().filter(|p| !p.is_root());
        if let Some(parent_path) = &cursor {
            if let Some(&parent) = state.path_index.get(parent_path) {
                self.create_leaf_node(state, parent, entity)?;
                return Ok(());
            }
        }

        // Upward scan for the first mapped ancestor, then unwind the stack
        // so every new namespace is created after its parent.
        let mut stack: Vec<SymbolPath> = Vec::with_capacity(entity.path.depth().saturating_sub(1));
        let mut anchor = root;
        while let Some(path) = cursor {
            if let Some(&id) = state.path_index.get(&path) {
                anchor = id;
                break;
            }
            cursor = path.parent().filter(|p| !p.is_root());
            stack.push(path);
        }
        let mut parent = anchor;
        while let Some(path) = stack.pop() {
            parent = self.create_namespace_node(state, parent, &path)?;
        }
        self.create_leaf_node(state, parent, entity)?;
        Ok(())
    }

    fn get_node_locked(&self, state: &mut TreeState, entity: &TypeEntity) -> Result<NodeId> {
        if !state.path_index.contains_key(&entity.path) {
            warn!("node for {} not found; reindexing", entity.path);
            self.add_entity_locked(state, entity)?;
        }
        let id = *state.path_index.get(&entity.path).ok_or_else(|| {
            TreeError::ConsistencyViolation(format!("indexing {} produced no node", entity.path))
        })?;
        match state.nodes.get(&id).map(TreeNode::kind) {
            Some(NodeKind::Leaf) => Ok(id),
            // unreachable in correct operation
            _ => Err(TreeError::ConsistencyViolation(format!(
                "node for {} is not a leaf node",
                entity.path
            ))),
        }
    }

    fn remove_entity_locked(&self, state: &mut TreeState, entity: &TypeEntity) -> Result<()> {
        let Some(&id) = state.path_index.get(&entity.path) else {
            debug!("removal of unindexed entity {}; ignoring", entity.path);
            return Ok(());
        };
        let Some(node) = state.nodes.get(&id) else {
            return Err(TreeError::ConsistencyViolation(format!(
                "path index entry for {} does not resolve to a live node",
                entity.path
            )));
        };
        if node.name() != entity.name {
            debug!("stale removal for {}; ignoring", entity.path);
            return Ok(());
        }
        if node.kind() != NodeKind::Leaf {
            return Err(TreeError::ConsistencyViolation(format!(
                "removal target {} is not a leaf node",
                entity.path
            )));
        }
        let parent = node.parent();
        let record = self.store.record(id).ok_or_else(|| {
            TreeError::ConsistencyViolation(format!("no record for node {id}"))
        })?;

        if record.child_keys.is_empty() {
            self.store.transaction(|txn| {
                if let Some(parent_id) = parent {
                    if let Some(mut parent_record) = txn.record(parent_id) {
                        if parent_record.remove_child_key(id) {
                            txn.update_record(&parent_record)?;
                        }
                    }
                }
                txn.remove_record(id)
            })?;
            if let Some(parent_id) = parent {
                detach_child(state, parent_id, id);
            }
            state.nodes.remove(&id);
            state.path_index.remove(&entity.path);
        } else {
            // The leaf still anchors descendants from an earlier conversion;
            // demote it back to a namespace instead of orphaning them.
            self.store.transaction(|txn| {
                let mut record = txn.record(id).ok_or_else(|| {
                    RecordStoreError::Corrupt(format!("missing record {id}"))
                })?;
                record.convert_to_namespace();
                txn.update_record(&record)
            })?;
            if let Some(node) = state.nodes.get_mut(&id) {
                node.convert_to_namespace();
            }
        }
        Ok(())
    }

    fn update_entity_locked(&self, state: &mut TreeState, entity: &TypeEntity) -> Result<()> {
        let id = self.get_node_locked(state, entity)?;
        self.store.transaction(|txn| {
            let mut record = txn
                .record(id)
                .ok_or_else(|| RecordStoreError::Corrupt(format!("missing record {id}")))?;
            record.leaf_ref = Some(entity.key);
            txn.update_record(&record)
        })?;
        if let Some(node) = state.nodes.get_mut(&id) {
            node.set_leaf_ref(entity.key);
        }
        Ok(())
    }

    fn generate_children_locked(
        &self,
        state: &mut TreeState,
        id: NodeId,
        token: &CancellationToken,
    ) -> Result<Vec<NodeId>> {
        if !state.nodes.contains_key(&id) {
            return Err(TreeError::ConsistencyViolation(format!(
                "node {id} is not live"
            )));
        }
        let record = self.store.record(id).ok_or_else(|| {
            TreeError::ConsistencyViolation(format!("no record for node {id}"))
        })?;

        // A correct table never carries duplicate child keys; checked here
        // rather than assumed.
        let mut seen: HashSet<RecordKey> = HashSet::with_capacity(record.child_keys.len());
        let mut fetched: Vec<NodeRecord> = Vec::with_capacity(record.child_keys.len());
        for key in &record.child_keys {
            if token.is_cancelled() {
                return Err(TreeError::Cancelled);
            }
            if !seen.insert(*key) {
                continue;
            }
            let child = self.store.record(*key).ok_or_else(|| {
                TreeError::ConsistencyViolation(format!("dangling child key {key}"))
            })?;
            fetched.push(child);
        }
        fetched.sort_by(|a, b| a.name.cmp(&b.name));

        // No state was touched above; from here on the load is committed.
        let mut ids = Vec::with_capacity(fetched.len());
        for child in &fetched {
            match state.nodes.get_mut(&child.key) {
                Some(node) => node.set_parent(Some(id)),
                None => {
                    let node = TreeNode::from_record(child, Some(id))?;
                    state.path_index.insert(node.path().clone(), child.key);
                    state.nodes.insert(child.key, node);
                }
            }
            ids.push(child.key);
        }
        if let Some(node) = state.nodes.get_mut(&id) {
            node.set_children(ids.clone());
        }
        Ok(ids)
    }

    fn create_namespace_node(
        &self,
        state: &mut TreeState,
        parent: NodeId,
        path: &SymbolPath,
    ) -> Result<NodeId> {
        let name = path.name().ok_or_else(|| {
            TreeError::ConsistencyViolation("namespace node at the root path".to_string())
        })?;
        let path_str = path.to_string();
        // After a structural reset the row may already be persisted; the
        // unique-path invariant means it is this node.
        let record = self.store.transaction(|txn| match txn.record_by_path(&path_str) {
            Some(existing) => Ok(existing),
            None => txn.create_record(&path_str, name, RecordKind::Namespace),
        })?;
        let mut node = TreeNode::from_record(&record, None)?;
        if record.child_keys.is_empty() {
            node.mark_materialized();
        }
        state.path_index.insert(path.clone(), record.key);
        state.nodes.insert(record.key, node);
        self.attach_child(state, parent, record.key)?;
        Ok(record.key)
    }

    fn create_leaf_node(
        &self,
        state: &mut TreeState,
        parent: NodeId,
        entity: &TypeEntity,
    ) -> Result<NodeId> {
        let path_str = entity.path.to_string();
        let record = self.store.transaction(|txn| {
            let mut record = match txn.record_by_path(&path_str) {
                Some(existing) => existing,
                None => txn.create_record(&path_str, &entity.name, RecordKind::Leaf)?,
            };
            record.convert_to_leaf(entity.key);
            txn.update_record(&record)?;
            Ok(record)
        })?;
        let node = TreeNode::from_record(&record, None)?;
        state.path_index.insert(entity.path.clone(), record.key);
        state.nodes.insert(record.key, node);
        self.attach_child(state, parent, record.key)?;
        Ok(record.key)
    }

    /// Convert the namespace node at `id` into a leaf bound to `entity`,
    /// in place: same record key, payload swapped, children preserved.
    fn convert_to_leaf(&self, state: &mut TreeState, id: NodeId, entity: &TypeEntity) -> Result<()> {
        self.store.transaction(|txn| {
            let mut record = txn
                .record(id)
                .ok_or_else(|| RecordStoreError::Corrupt(format!("missing record {id}")))?;
            record.convert_to_leaf(entity.key);
            txn.update_record(&record)
        })?;
        if let Some(node) = state.nodes.get_mut(&id) {
            node.convert_to_leaf(entity.key);
        }
        Ok(())
    }

    /// Link `child` under `parent`: persist the key into the parent record's
    /// sorted child array, and when the parent's in-memory child list is
    /// already materialized, insert at the binary-search position.
    fn attach_child(&self, state: &mut TreeState, parent: NodeId, child: NodeId) -> Result<()> {
        self.store.transaction(|txn| {
            let mut parent_record = txn
                .record(parent)
                .ok_or_else(|| RecordStoreError::Corrupt(format!("missing record {parent}")))?;
            if parent_record.add_child_key(child) {
                txn.update_record(&parent_record)?;
            }
            Ok(())
        })?;

        let child_name = state
            .nodes
            .get(&child)
            .map(|node| node.name().to_string())
            .ok_or_else(|| {
                TreeError::ConsistencyViolation(format!("attach of unknown node {child}"))
            })?;
        let slot = state.nodes.get(&parent).and_then(|parent_node| {
            parent_node.children().map(|ids| {
                ids.binary_search_by(|id| node_name(state, *id).cmp(child_name.as_str()))
            })
        });
        match slot {
            Some(Ok(_)) => {
                return Err(TreeError::ConsistencyViolation(format!(
                    "child node {child_name} already exists under node {parent}"
                )));
            }
            Some(Err(index)) => {
                if let Some(parent_node) = state.nodes.get_mut(&parent) {
                    parent_node.insert_child_at(index, child);
                }
            }
            None => {}
        }
        if let Some(node) = state.nodes.get_mut(&child) {
            node.set_parent(Some(parent));
        }
        Ok(())
    }
}

fn node_name(state: &TreeState, id: NodeId) -> &str {
    state
        .nodes
        .get(&id)
        .map(|node| node.name())
        .unwrap_or_default()
}

/// Unlink `child` from `parent`'s materialized child list, when loaded.
fn detach_child(state: &mut TreeState, parent: NodeId, child: NodeId) {
    let name = node_name(state, child).to_string();
    let index = state.nodes.get(&parent).and_then(|parent_node| {
        parent_node
            .children()
            .and_then(|ids| ids.binary_search_by(|id| node_name(state, *id).cmp(name.as_str())).ok())
    });
    if let Some(index) = index {
        if let Some(parent_node) = state.nodes.get_mut(&parent) {
            parent_node.remove_child_at(index);
        }
    }
    if let Some(node) = state.nodes.get_mut(&child) {
        node.set_parent(None);
    }
}
