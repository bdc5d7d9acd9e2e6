use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("fulltext index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("could not install the interrupt handler: {0}")]
    ShutdownHandler(#[from] ctrlc::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("document query failed: {0}")]
    Query(String),

    #[error("attribute {name} is not present on document {id}")]
    AttributeNotPresent { id: String, name: String },

    #[error("fulltext oracle unavailable: {0}")]
    Oracle(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("indexing dispatch failed: {0}")]
    Dispatch(String),

    #[error("invalid import record on line {line}: {message}")]
    Import { line: usize, message: String },

    #[error("document {0} cannot be modified")]
    Immutable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` for a cooperative stop request rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
