use crate::error::{RecordStoreError, Result};
use crate::record::{NodeRecord, RecordKey, RecordKind, ROOT_NAME, ROOT_PATH};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Version of the persisted table format. A mismatch is fatal at open.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    version: u32,
    next_key: RecordKey,
    records: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Default)]
struct StoreInner {
    records: BTreeMap<RecordKey, NodeRecord>,
    paths: HashMap<String, RecordKey>,
    next_key: RecordKey,
}

impl StoreInner {
    fn from_table(table: TableFile) -> Result<Self> {
        let mut inner = Self {
            next_key: table.next_key,
            ..Self::default()
        };
        for record in table.records {
            if inner.paths.insert(record.path.clone(), record.key).is_some() {
                return Err(RecordStoreError::Corrupt(format!(
                    "duplicate path {:?}",
                    record.path
                )));
            }
            if record.key >= inner.next_key {
                inner.next_key = record.key + 1;
            }
            inner.records.insert(record.key, record);
        }
        Ok(inner)
    }

    fn to_table(&self) -> TableFile {
        TableFile {
            version: SCHEMA_VERSION,
            next_key: self.next_key,
            records: self.records.values().cloned().collect(),
        }
    }
}

/// Durable table of tree-node records for one type source.
///
/// An exclusive lock serializes every multi-step read-modify-write sequence;
/// readers observe only committed state.
pub struct RecordStore {
    file: PathBuf,
    inner: Mutex<StoreInner>,
}

impl RecordStore {
    /// Open the table at `file`, creating an empty one when absent.
    ///
    /// A persisted schema version different from [`SCHEMA_VERSION`] surfaces
    /// as [`RecordStoreError::SchemaMismatch`] before any record is touched.
    pub fn open(file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        let inner = if file.exists() {
            let data = fs::read(&file)?;
            let table: TableFile = serde_json::from_slice(&data)?;
            if table.version != SCHEMA_VERSION {
                return Err(RecordStoreError::SchemaMismatch {
                    found: table.version,
                    expected: SCHEMA_VERSION,
                });
            }
            StoreInner::from_table(table)?
        } else {
            StoreInner::default()
        };
        debug!("opened record store at {:?} with {} records", file, inner.records.len());
        Ok(Self {
            file,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` against the table inside a transaction.
    ///
    /// Inner store operations made through the [`StoreTxn`] participate in
    /// this frame; the frame flushes to disk on success and rolls the
    /// in-memory table back when `f` or the flush fails, leaving the
    /// attempted mutation uncommitted.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut StoreTxn<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let backup = guard.clone();
        let mut txn = StoreTxn { inner: &mut guard };
        match f(&mut txn) {
            Ok(value) => match flush(&self.file, &guard) {
                Ok(()) => Ok(value),
                Err(err) => {
                    *guard = backup;
                    Err(err)
                }
            },
            Err(err) => {
                *guard = backup;
                Err(err)
            }
        }
    }

    /// Fetch a committed record by key.
    pub fn record(&self, key: RecordKey) -> Option<NodeRecord> {
        self.lock().records.get(&key).cloned()
    }

    /// Fetch a committed record by its unique path string.
    pub fn record_by_path(&self, path: &str) -> Option<NodeRecord> {
        let guard = self.lock();
        let key = guard.paths.get(path)?;
        guard.records.get(key).cloned()
    }

    /// Fetch the root record, creating it on first access.
    pub fn root_record(&self) -> Result<NodeRecord> {
        if let Some(record) = self.record_by_path(ROOT_PATH) {
            return Ok(record);
        }
        self.transaction(|txn| txn.root_record())
    }

    /// Allocate and persist a new record in its own minimal transaction.
    pub fn create_record(&self, path: &str, name: &str, kind: RecordKind) -> Result<NodeRecord> {
        self.transaction(|txn| txn.create_record(path, name, kind))
    }

    /// Persist an in-place mutation of an existing record in its own
    /// minimal transaction.
    pub fn update_record(&self, record: &NodeRecord) -> Result<()> {
        self.transaction(|txn| txn.update_record(record))
    }

    /// Delete a record in its own minimal transaction.
    pub fn remove_record(&self, key: RecordKey) -> Result<()> {
        self.transaction(|txn| txn.remove_record(key))
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }
}

/// Handle to an open transaction frame. All mutations made through it become
/// visible to other callers only once the frame commits.
pub struct StoreTxn<'a> {
    inner: &'a mut StoreInner,
}

impl StoreTxn<'_> {
    pub fn record(&self, key: RecordKey) -> Option<NodeRecord> {
        self.inner.records.get(&key).cloned()
    }

    pub fn record_by_path(&self, path: &str) -> Option<NodeRecord> {
        let key = self.inner.paths.get(path)?;
        self.inner.records.get(key).cloned()
    }

    pub fn root_record(&mut self) -> Result<NodeRecord> {
        if let Some(record) = self.record_by_path(ROOT_PATH) {
            return Ok(record);
        }
        self.create_record(ROOT_PATH, ROOT_NAME, RecordKind::Namespace)
    }

    pub fn create_record(&mut self, path: &str, name: &str, kind: RecordKind) -> Result<NodeRecord> {
        if self.inner.paths.contains_key(path) {
            return Err(RecordStoreError::DuplicatePath(path.to_string()));
        }
        let key = self.inner.next_key;
        self.inner.next_key += 1;
        let record = NodeRecord::new(key, kind, name, path);
        self.inner.paths.insert(record.path.clone(), key);
        self.inner.records.insert(key, record.clone());
        Ok(record)
    }

    pub fn update_record(&mut self, record: &NodeRecord) -> Result<()> {
        let Some(existing) = self.inner.records.get(&record.key) else {
            return Err(RecordStoreError::Corrupt(format!(
                "update of missing record {}",
                record.key
            )));
        };
        if existing.path != record.path {
            if self.inner.paths.contains_key(&record.path) {
                return Err(RecordStoreError::DuplicatePath(record.path.clone()));
            }
            self.inner.paths.remove(&existing.path);
            self.inner.paths.insert(record.path.clone(), record.key);
        }
        self.inner.records.insert(record.key, record.clone());
        Ok(())
    }

    pub fn remove_record(&mut self, key: RecordKey) -> Result<()> {
        if let Some(record) = self.inner.records.remove(&key) {
            self.inner.paths.remove(&record.path);
        }
        Ok(())
    }
}

fn flush(file: &Path, inner: &StoreInner) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(&inner.to_table())?;
    let tmp = file.with_extension("tmp");
    {
        let mut out = fs::File::create(&tmp)?;
        out.write_all(&data)?;
        out.sync_all()?;
    }
    fs::rename(&tmp, file)?;
    Ok(())
}
