//! The `Transaction` data model and its status state machine.

use crate::metadata::ConflictMetadata;
use crate::payload::{Payload, TransactionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    New,
    Pending,
    Syncing,
    Synced,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    /// The state-machine table (§4.3), consulted by every mutating queue
    /// operation rather than re-derived in scattered conditionals.
    pub fn allowed_transitions(&self) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match self {
            New => &[Pending, Cancelled],
            Pending => &[Syncing, Cancelled],
            Syncing => &[Synced, Failed],
            Failed => &[Pending],
            Synced => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Synced | TransactionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub payload: Payload,
    pub status: TransactionStatus,
    pub priority: Priority,

    pub created_at: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub sync_completed_at: Option<DateTime<Utc>>,

    pub attempts: u32,
    pub max_attempts: u32,

    pub last_error: Option<String>,
    pub server_transaction_id: Option<String>,

    pub user_id: String,
    pub device_id: String,
    pub related_transaction_ids: Vec<TransactionId>,

    pub metadata: ConflictMetadata,
}

/// Options accepted by [`crate::queue::TransactionQueue::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    pub related_transaction_ids: Vec<TransactionId>,
    pub parent_ids: Vec<TransactionId>,
}

impl Transaction {
    pub fn transaction_type(&self) -> TransactionType {
        self.payload.transaction_type()
    }
}
