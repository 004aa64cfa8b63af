use crate::error::{Result, TreeError};
use crate::manager::TreeNodeManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Composite root over independent per-source sub-trees, kept sorted by
/// source name.
///
/// Attaching an already-attached source is a fatal consistency violation;
/// double-opening a source must be prevented upstream.
pub struct TypeForest {
    sources: Mutex<Vec<SourceTree>>,
    active: AtomicBool,
}

struct SourceTree {
    name: String,
    manager: Arc<TreeNodeManager>,
}

impl TypeForest {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
        }
    }

    /// Whether this forest is currently bound to a visible tree widget.
    /// Structural-reset notifications are ignored while inactive.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SourceTree>> {
        match self.sources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a per-source sub-tree at its binary-search position.
    pub fn attach_source(&self, manager: Arc<TreeNodeManager>) -> Result<()> {
        let name = manager.source_name().to_string();
        let mut sources = self.lock();
        match sources.binary_search_by(|tree| tree.name.as_str().cmp(name.as_str())) {
            Ok(_) => Err(TreeError::ConsistencyViolation(format!(
                "source {name} is already attached"
            ))),
            Err(index) => {
                info!(source = %name, "attaching source tree");
                sources.insert(index, SourceTree { name, manager });
                Ok(())
            }
        }
    }

    /// Detach the sub-tree for `name` and dispose everything beneath it.
    /// Returns `false` when no such source is attached.
    pub fn detach_source(&self, name: &str) -> bool {
        let mut sources = self.lock();
        match sources.binary_search_by(|tree| tree.name.as_str().cmp(name)) {
            Ok(index) => {
                let tree = sources.remove(index);
                drop(sources);
                info!(source = %name, "detaching source tree");
                tree.manager.invalidate();
                true
            }
            Err(_) => false,
        }
    }

    pub fn manager(&self, name: &str) -> Option<Arc<TreeNodeManager>> {
        let sources = self.lock();
        let index = sources
            .binary_search_by(|tree| tree.name.as_str().cmp(name))
            .ok()?;
        Some(Arc::clone(&sources[index].manager))
    }

    /// Attached source names, in display order.
    pub fn source_names(&self) -> Vec<String> {
        self.lock().iter().map(|tree| tree.name.clone()).collect()
    }

    pub fn source_count(&self) -> usize {
        self.lock().len()
    }

    /// Handle a notification that `name`'s backing store was externally
    /// reverted or replaced wholesale. The divergence extent is unknown, so
    /// the source's in-memory index is discarded and rebuilt lazily.
    pub fn source_reverted(&self, name: &str) {
        if !self.is_active() {
            return;
        }
        if let Some(manager) = self.manager(name) {
            manager.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::SymbolPath;
    use crate::source::{EntitySource, TypeEntity};
    use classtree_record_store::{RecordStore, RecordStoreError};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct StubSource(String);

    impl EntitySource for StubSource {
        fn name(&self) -> &str {
            &self.0
        }

        fn type_count(&self) -> usize {
            0
        }

        fn db_error(&self, _err: &RecordStoreError) {}
    }

    fn manager(dir: &TempDir, name: &str) -> Arc<TreeNodeManager> {
        let store = Arc::new(
            RecordStore::open(dir.path().join(format!("{name}.json")))
                .expect("Failed to open store"),
        );
        Arc::new(TreeNodeManager::new(
            store,
            Arc::new(StubSource(name.to_string())),
        ))
    }

    #[test]
    fn test_sources_are_kept_sorted_by_name() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let forest = TypeForest::new();

        for name in ["libz.so", "app.exe", "libstdc++.so"] {
            forest
                .attach_source(manager(&dir, name))
                .expect("Failed to attach");
        }

        assert_eq!(
            forest.source_names(),
            vec!["app.exe", "libstdc++.so", "libz.so"]
        );
    }

    #[test]
    fn test_duplicate_source_attach_is_fatal() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let forest = TypeForest::new();

        forest
            .attach_source(manager(&dir, "app.exe"))
            .expect("first attach");
        assert!(matches!(
            forest.attach_source(manager(&dir, "app.exe")),
            Err(TreeError::ConsistencyViolation(_))
        ));
        assert_eq!(forest.source_count(), 1);
    }

    #[test]
    fn test_detach_removes_sub_tree() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let forest = TypeForest::new();

        forest
            .attach_source(manager(&dir, "app.exe"))
            .expect("attach");
        assert!(forest.detach_source("app.exe"));
        assert!(!forest.detach_source("app.exe"));
        assert!(forest.manager("app.exe").is_none());
    }

    #[test]
    fn test_revert_notification_respects_active_flag() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let forest = TypeForest::new();
        let manager = manager(&dir, "app.exe");
        forest.attach_source(Arc::clone(&manager)).expect("attach");

        let path = SymbolPath::parse("A::B");
        manager
            .add_entity(&TypeEntity::new("app.exe", 1, path.clone()))
            .expect("add");

        // inactive trees ignore the notification
        forest.set_active(false);
        forest.source_reverted("app.exe");
        assert!(manager.lookup(&path).is_some());

        forest.set_active(true);
        forest.source_reverted("app.exe");
        assert_eq!(manager.lookup(&path), None);

        // notifications naming another source leave this one alone
        manager
            .add_entity(&TypeEntity::new("app.exe", 1, path.clone()))
            .expect("re-add");
        forest.source_reverted("other.exe");
        assert!(manager.lookup(&path).is_some());
    }
}
