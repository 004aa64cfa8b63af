use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema version mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("Record with path {0:?} already exists")]
    DuplicatePath(String),

    #[error("Record table corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, RecordStoreError>;
