use classtree_record_store::RecordStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Record store error: {0}")]
    Store(#[from] RecordStoreError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Tree consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Mutation queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, TreeError>;
