/*!
# ClassTree Record Store

Durable table of tree-node records backing one type source.

Each row describes a single position in the namespace hierarchy: its
discriminant (namespace or leaf), display name, unique path string and the
sorted set of child record keys. The store owns schema versioning and all
physical I/O; callers never touch the file directly.

All mutations go through [`RecordStore::transaction`], which commits on the
outermost frame and rolls back in-memory state when the closure or the flush
fails, so every externally visible mutation is atomic.
*/

mod error;
mod record;
mod store;

pub use error::{RecordStoreError, Result};
pub use record::{NodeRecord, RecordKey, RecordKind, ROOT_NAME, ROOT_PATH};
pub use store::{RecordStore, StoreTxn, SCHEMA_VERSION};
