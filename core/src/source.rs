use crate::path::SymbolPath;
use classtree_record_store::RecordStoreError;

/// Collaborator contract for the external store of discovered types.
///
/// The tree never inspects type internals; it sees an opaque key, a display
/// name and a namespace path, and reports storage failures back through
/// [`EntitySource::db_error`].
pub trait EntitySource: Send + Sync {
    /// Identity of this source, unique across the forest.
    fn name(&self) -> &str;

    /// Number of discovered types, used to size the path index.
    fn type_count(&self) -> usize;

    /// Sink for storage failures encountered while indexing this source.
    fn db_error(&self, err: &RecordStoreError);
}

/// A discovered entity as carried by discovery events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntity {
    /// Name of the source that discovered this entity.
    pub source: String,
    /// Reference key into the external type store.
    pub key: u64,
    /// Current display name. May lag behind the indexed node's name when a
    /// removal races a rename.
    pub name: String,
    /// Position in the namespace hierarchy.
    pub path: SymbolPath,
}

impl TypeEntity {
    pub fn new(source: &str, key: u64, path: SymbolPath) -> Self {
        let name = path.name().unwrap_or_default().to_string();
        Self {
            source: source.to_string(),
            key,
            name,
            path,
        }
    }
}
