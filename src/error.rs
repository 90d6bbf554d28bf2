//! Per-subsystem error types.
//!
//! Every variant corresponds to one of the machine-readable reason strings
//! named in the design doc's error handling section. `code()` returns that
//! bare snake_case token for callers that match on it programmatically
//! (a UI surfacing retry controls, for instance) rather than parsing `Display`.

use crate::transaction::{TransactionId, TransactionStatus};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue not initialized")]
    NotInitialized,

    #[error("queue initialization failed: {0}")]
    InitializationFailed(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: u64 },

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("storage error: {0}")]
    StorageError(#[from] crate::storage::StorageError),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::NotInitialized => "not_initialized",
            QueueError::InitializationFailed(_) => "initialization_failed",
            QueueError::TransactionNotFound(_) => "transaction_not_found",
            QueueError::QueueFull { .. } => "queue_full",
            QueueError::InvalidStatusTransition { .. } => "invalid_status_transition",
            QueueError::StorageError(_) => "storage_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata validation failed on field `{field}`: {reason}")]
    ValidationFailed { field: String, reason: String },
}

impl MetadataError {
    pub fn code(&self) -> &'static str {
        "validation_failed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("network detector not initialized")]
    NotInitialized,

    #[error("network detector initialization failed: {0}")]
    InitializationFailed(String),

    #[error("failed to start network monitoring: {0}")]
    StartFailed(String),

    #[error("failed to stop network monitoring: {0}")]
    StopFailed(String),

    #[error("ping failed: {0}")]
    PingFailed(String),

    #[error("invalid network detector config: {0}")]
    InvalidConfig(String),

    #[error("platform connectivity signal not supported on this target")]
    PlatformNotSupported,
}

impl NetworkError {
    pub fn code(&self) -> &'static str {
        match self {
            NetworkError::NotInitialized => "not_initialized",
            NetworkError::InitializationFailed(_) => "initialization_failed",
            NetworkError::StartFailed(_) => "start_failed",
            NetworkError::StopFailed(_) => "stop_failed",
            NetworkError::PingFailed(_) => "ping_failed",
            NetworkError::InvalidConfig(_) => "invalid_config",
            NetworkError::PlatformNotSupported => "platform_not_supported",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("sync engine not initialized")]
    NotInitialized,

    #[error("sync engine initialization failed: {0}")]
    InitializationFailed(String),

    #[error("sync run failed: {0}")]
    SyncFailed(String),

    #[error("batch failed: {0}")]
    BatchFailed(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("sync request timed out")]
    TimeoutError,

    #[error("session is no longer valid; re-authentication required")]
    AuthRequired,

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::NotInitialized => "not_initialized",
            SyncError::InitializationFailed(_) => "initialization_failed",
            SyncError::SyncFailed(_) => "sync_failed",
            SyncError::BatchFailed(_) => "batch_failed",
            SyncError::NetworkError(_) => "network_error",
            SyncError::ServerError(_) => "server_error",
            SyncError::TimeoutError => "timeout_error",
            SyncError::AuthRequired => "auth_required",
            SyncError::Queue(e) => e.code(),
        }
    }
}
