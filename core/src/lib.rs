/*!
# ClassTree Core

Persistent namespace-tree index for hierarchical entities discovered by
binary analysis (C++ runtime type information).

Discovered symbols are merged into a lazily materialized tree: records live
in a durable per-source table, namespace nodes are synthesized on demand
from leaf paths, and a UI consumer expands containers incrementally through
cancellable child generation. Structural mutations from concurrent
producers are serialized through a single FIFO queue.

## Example

```rust,no_run
use classtree_core::{
    EntitySource, MutationQueue, SymbolPath, TreeMutation, TreeNodeManager, TypeEntity, TypeForest,
};
use classtree_record_store::{RecordStore, RecordStoreError};
use std::sync::Arc;

struct Analyzer;

impl EntitySource for Analyzer {
    fn name(&self) -> &str {
        "app.exe"
    }

    fn type_count(&self) -> usize {
        0
    }

    fn db_error(&self, err: &RecordStoreError) {
        eprintln!("storage failure: {err}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RecordStore::open("app.exe-tree.json")?);
    let manager = Arc::new(TreeNodeManager::new(store, Arc::new(Analyzer)));

    let forest = Arc::new(TypeForest::new());
    forest.attach_source(manager)?;

    let queue = MutationQueue::spawn(Arc::clone(&forest));
    let entity = TypeEntity::new("app.exe", 1, SymbolPath::parse("std::bad_alloc"));
    queue.enqueue(TreeMutation::EntityAdded(entity))?.wait().await?;

    queue.shutdown().await;
    Ok(())
}
```
*/

mod error;
mod forest;
mod manager;
mod node;
mod path;
mod queue;
mod source;

pub use error::{Result, TreeError};
pub use forest::TypeForest;
pub use manager::TreeNodeManager;
pub use node::{NodeId, NodeKind, TreeNode};
pub use path::{SymbolPath, PATH_SEPARATOR};
pub use queue::{MutationHandle, MutationQueue, TreeMutation};
pub use source::{EntitySource, TypeEntity};
