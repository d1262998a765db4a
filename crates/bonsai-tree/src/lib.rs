//! Persistent branching conversation tree with a single current-node pointer.
//!
//! `TreeStore` owns node creation, traversal, cascading deletion, and
//! duplication on top of a `TreeBackend`. Two backends ship with the crate:
//! `SqliteTreeBackend` for durable storage and `InMemoryTreeBackend` for tests
//! and embedding.

use thiserror::Error;

mod backend;
mod integrity;
mod node;
mod sqlite;
mod store;

pub use backend::{InMemoryTreeBackend, TreeBackend, CURRENT_NODE_KEY};
pub use integrity::TreeValidationReport;
pub use node::{Node, NodeId, NodeKind};
pub use sqlite::SqliteTreeBackend;
pub use store::{CreateOutcome, TreeStore};

/// Result type for tree store operations.
pub type StoreResult<T> = Result<T, TreeStoreError>;

/// Errors returned by the tree store and its backends.
#[derive(Debug, Error)]
pub enum TreeStoreError {
    #[error("node '{0}' not found")]
    NotFound(NodeId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage fault: {0}")]
    Storage(#[from] StorageFault),
    #[error("inconsistent tree: {0}")]
    Inconsistent(String),
}

impl TreeStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Backend read/write failures. Never swallowed by the store.
#[derive(Debug, Error)]
pub enum StorageFault {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl From<rusqlite::Error> for TreeStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Storage(StorageFault::Sqlite(error))
    }
}

impl From<std::io::Error> for TreeStoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(StorageFault::Io(error))
    }
}
