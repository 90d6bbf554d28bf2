//! Offline-first client synchronization core: a durable FIFO transaction
//! queue, conflict-detection metadata, a network reconnection detector, and
//! a sync engine that ties them together. Storage and encryption are
//! consumed as collaborator traits; this crate never assumes a concrete
//! backend for either.

pub mod encryption;
pub mod error;
pub mod events;
pub mod hash;
pub mod metadata;
pub mod network;
pub mod payload;
pub mod queue;
pub mod storage;
pub mod syncengine;
pub mod transaction;

pub use error::{MetadataError, NetworkError, QueueError, SyncError};
pub use events::{Publisher, SharedPublisher, Subscription};
pub use metadata::{ConflictKind, ConflictMetadata, ConflictResult, Resolution};
pub use network::{ConnectivityState, NetworkConfig, NetworkDetector, NetworkEvent, NetworkStats};
pub use payload::{Payload, PayloadValue, TransactionType};
pub use queue::{QueueConfig, QueueEvent, QueueStats, TransactionQueue};
pub use storage::{InMemoryTransactionStorage, SqliteTransactionStorage, TransactionFilter, TransactionStorage};
pub use syncengine::{BatchResult, SyncConfig, SyncEngine, SyncEvent, SyncProgress, SyncProgressEvent, SyncStats, SyncStatus};
pub use transaction::{EnqueueOptions, Priority, Transaction, TransactionId, TransactionStatus};
