//! The storage collaborator: a persistent, queryable backing store for
//! transactions. This module specifies only the interface the queue needs
//! (§6 "Storage collaborator") plus two reference implementations — an
//! in-memory store for tests and a SQLite-backed one matching the teacher's
//! `sqlx` stack. Production embedders may supply any other implementation of
//! [`TransactionStorage`]; the core never assumes a particular backend.

mod memory;
mod sqlite;

pub use memory::InMemoryTransactionStorage;
pub use sqlite::SqliteTransactionStorage;

use crate::payload::TransactionType;
use crate::transaction::{Priority, Transaction, TransactionId, TransactionStatus};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("encryption authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// A closed set of typed predicates over the `Transaction` shape — the
/// statically typed replacement for the source's dotted field-path query
/// conditions (Design Notes, §9). `None` means "no constraint on this field."
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub statuses: Option<Vec<TransactionStatus>>,
    pub transaction_type: Option<TransactionType>,
    pub priority: Option<Priority>,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub resource: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl TransactionFilter {
    pub fn with_status(status: TransactionStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            ..Default::default()
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&tx.status) {
                return false;
            }
        }
        if let Some(t) = self.transaction_type {
            if tx.transaction_type() != t {
                return false;
            }
        }
        if let Some(p) = self.priority {
            if tx.priority != p {
                return false;
            }
        }
        if let Some(u) = &self.user_id {
            if &tx.user_id != u {
                return false;
            }
        }
        if let Some(d) = &self.device_id {
            if &tx.device_id != d {
                return false;
            }
        }
        if let Some(r) = &self.resource {
            if &tx.payload.resource != r {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct QueryPage {
    pub transactions: Vec<Transaction>,
    pub total_count: u64,
    pub has_more: bool,
}

/// Hook wrapping the at-rest bytes of a stored transaction. Transparent on
/// both the read and write path; the core treats the envelope as opaque.
#[async_trait]
pub trait EncryptionHook: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError>;
    async fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// The storage collaborator's interface, specialized to transactions (see
/// module docs for why this isn't a generic collection/path-query surface).
#[async_trait]
pub trait TransactionStorage: Send + Sync {
    async fn initialize(&self) -> Result<(), StorageError>;
    async fn close(&self) -> Result<(), StorageError>;

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, StorageError>;
    async fn put(&self, transaction: &Transaction) -> Result<(), StorageError>;
    async fn delete(&self, id: &TransactionId) -> Result<(), StorageError>;

    async fn query(&self, filter: &TransactionFilter) -> Result<QueryPage, StorageError>;
    async fn count(&self, filter: &TransactionFilter) -> Result<u64, StorageError>;

    /// Removes every record matching `filter`; returns the number removed.
    async fn clear(&self, filter: &TransactionFilter) -> Result<u64, StorageError>;
    async fn clear_all(&self) -> Result<u64, StorageError>;
}
