use crate::error::{Result, TreeError};
use crate::forest::TypeForest;
use crate::source::TypeEntity;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One externally triggered structural mutation.
#[derive(Debug, Clone)]
pub enum TreeMutation {
    EntityAdded(TypeEntity),
    EntityRemoved(TypeEntity),
    EntityUpdated(TypeEntity),
    SourceReverted { source: String },
}

/// Completion handle for an enqueued mutation. Resolves once the worker has
/// applied the mutation, in queue order.
pub struct MutationHandle {
    done: oneshot::Receiver<Result<()>>,
}

impl MutationHandle {
    pub async fn wait(self) -> Result<()> {
        self.done.await.map_err(|_| TreeError::QueueClosed)?
    }
}

struct QueuedMutation {
    mutation: TreeMutation,
    done: oneshot::Sender<Result<()>>,
}

/// FIFO serialization point for structural mutations.
///
/// Every discovery event is wrapped as a unit of work and drained by exactly
/// one worker task, so mutations apply in the order the originating events
/// were observed, regardless of which producer observed them. Enqueue
/// returns immediately; completion is signaled through the handle.
pub struct MutationQueue {
    tx: mpsc::UnboundedSender<QueuedMutation>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl MutationQueue {
    /// Start the worker task draining mutations against `forest`.
    pub fn spawn(forest: Arc<TypeForest>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(forest, rx, shutdown.clone()));
        Self {
            tx,
            shutdown,
            worker,
        }
    }

    /// Queue a mutation for application. Fails only when the queue has been
    /// shut down.
    pub fn enqueue(&self, mutation: TreeMutation) -> Result<MutationHandle> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(QueuedMutation {
                mutation,
                done: done_tx,
            })
            .map_err(|_| TreeError::QueueClosed)?;
        Ok(MutationHandle { done: done_rx })
    }

    /// Stop the worker and wait for it to finish. Mutations still queued are
    /// dropped; their handles resolve to [`TreeError::QueueClosed`].
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.worker.await {
            warn!("mutation queue worker did not shut down cleanly: {err}");
        }
    }
}

async fn run_worker(
    forest: Arc<TypeForest>,
    mut rx: mpsc::UnboundedReceiver<QueuedMutation>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            item = rx.recv() => {
                let Some(QueuedMutation { mutation, done }) = item else {
                    break;
                };
                let result = apply(&forest, mutation);
                if let Err(err) = &result {
                    debug!("mutation failed: {err}");
                }
                let _ = done.send(result);
            }
        }
    }
}

fn apply(forest: &TypeForest, mutation: TreeMutation) -> Result<()> {
    match mutation {
        TreeMutation::EntityAdded(entity) => source_manager(forest, &entity)?.add_entity(&entity),
        TreeMutation::EntityRemoved(entity) => {
            source_manager(forest, &entity)?.remove_entity(&entity)
        }
        TreeMutation::EntityUpdated(entity) => {
            source_manager(forest, &entity)?.update_entity(&entity)
        }
        TreeMutation::SourceReverted { source } => {
            forest.source_reverted(&source);
            Ok(())
        }
    }
}

fn source_manager(
    forest: &TypeForest,
    entity: &TypeEntity,
) -> Result<Arc<crate::manager::TreeNodeManager>> {
    forest.manager(&entity.source).ok_or_else(|| {
        TreeError::ConsistencyViolation(format!("no source tree named {:?}", entity.source))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::TreeNodeManager;
    use crate::path::SymbolPath;
    use crate::source::EntitySource;
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

    const SOURCE: &str = "app.exe";

    fn forest_in(dir: &TempDir) -> Arc<TypeForest> {
        let store = Arc::new(
            RecordStore::open(dir.path().join("tree.json")).expect("Failed to open store"),
        );
        let manager = Arc::new(TreeNodeManager::new(
            store,
            Arc::new(StubSource(SOURCE.to_string())),
        ));
        let forest = Arc::new(TypeForest::new());
        forest.attach_source(manager).expect("Failed to attach");
        forest
    }

    fn entity(path: &str, key: u64) -> TypeEntity {
        TypeEntity::new(SOURCE, key, SymbolPath::parse(path))
    }

    #[tokio::test]
    async fn test_mutations_apply_in_fifo_order() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let forest = forest_in(&dir);
        let queue = MutationQueue::spawn(Arc::clone(&forest));

        let handles = vec![
            queue
                .enqueue(TreeMutation::EntityAdded(entity("A::B", 1)))
                .expect("enqueue"),
            queue
                .enqueue(TreeMutation::EntityUpdated(entity("A::B", 2)))
                .expect("enqueue"),
            queue
                .enqueue(TreeMutation::EntityRemoved(entity("A::B", 2)))
                .expect("enqueue"),
        ];
        for handle in handles {
            handle.wait().await.expect("mutation failed");
        }

        let manager = forest.manager(SOURCE).expect("manager missing");
        assert_eq!(manager.lookup(&SymbolPath::parse("A::B")), None);
        // the namespace synthesized for the insert is never pruned
        assert!(manager.lookup(&SymbolPath::parse("A")).is_some());

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_fails_after_shutdown() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let forest = forest_in(&dir);
        let queue = MutationQueue::spawn(Arc::clone(&forest));

        let tx = queue.tx.clone();
        queue.shutdown().await;

        let (done_tx, _done_rx) = oneshot::channel();
        let result = tx.send(QueuedMutation {
            mutation: TreeMutation::SourceReverted {
                source: SOURCE.to_string(),
            },
            done: done_tx,
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_source_reports_consistency_violation() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let forest = forest_in(&dir);
        let queue = MutationQueue::spawn(Arc::clone(&forest));

        let mut foreign = entity("A::B", 1);
        foreign.source = "other.exe".to_string();
        let handle = queue
            .enqueue(TreeMutation::EntityAdded(foreign))
            .expect("enqueue");
        assert!(matches!(
            handle.wait().await,
            Err(TreeError::ConsistencyViolation(_))
        ));

        queue.shutdown().await;
    }
}
