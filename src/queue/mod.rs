//! The durable FIFO transaction queue (§4.3), backed by a [`TransactionStorage`]
//! collaborator. Grounded on the teacher's `SyncQueue`: raw-SQL-shaped
//! persistence, a strict status state machine consulted through
//! [`TransactionStatus::allowed_transitions`], and ordering derived from
//! `queued_at` rather than an in-memory `Vec`.

use crate::error::QueueError;
use crate::events::Publisher;
use crate::metadata::ConflictMetadata;
use crate::payload::Payload;
use crate::storage::{QueryPage, TransactionFilter, TransactionStorage};
use crate::transaction::{EnqueueOptions, Priority, Transaction, TransactionId, TransactionStatus};
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `None` means unbounded. Enforced in [`TransactionQueue::enqueue`].
    pub max_size: Option<u64>,
    pub default_max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            default_max_attempts: crate::transaction::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total: u64,
    pub new: u64,
    pub pending: u64,
    pub syncing: u64,
    pub synced: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub oldest_pending_at: Option<chrono::DateTime<Utc>>,
    pub newest_pending_at: Option<chrono::DateTime<Utc>>,
    pub average_sync_duration_ms: Option<i64>,
    pub capacity: Option<u64>,
    pub available_capacity: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Enqueued(Transaction),
    StatusChanged {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },
    Cleared {
        filter_description: &'static str,
        count: u64,
    },
}

pub struct TransactionQueue<S: TransactionStorage> {
    storage: Arc<S>,
    config: QueueConfig,
    events: Publisher<QueueEvent>,
}

impl<S: TransactionStorage> TransactionQueue<S> {
    pub fn new(storage: Arc<S>, config: QueueConfig) -> Self {
        Self {
            storage,
            config,
            events: Publisher::new(),
        }
    }

    pub fn events(&self) -> &Publisher<QueueEvent> {
        &self.events
    }

    pub async fn initialize(&self) -> Result<(), QueueError> {
        self.storage.initialize().await?;
        Ok(())
    }

    /// Appends a new transaction in `New` status, immediately advanced to
    /// `Pending` — a fresh transaction is always sync-eligible as soon as
    /// it's queued. Enforces `max_size` against the *total* record count
    /// (including retained `synced`/`cancelled` rows), not just in-flight
    /// ones — the queue's size bound covers everything it retains.
    pub async fn enqueue(
        &self,
        payload: Payload,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        options: EnqueueOptions,
    ) -> Result<Transaction, QueueError> {
        if let Some(max_size) = self.config.max_size {
            let total = self.storage.count(&TransactionFilter::default()).await?;
            if total >= max_size {
                return Err(QueueError::QueueFull { capacity: max_size });
            }
        }

        let user_id = user_id.into();
        let device_id = device_id.into();
        let id = TransactionId::new();
        let metadata = ConflictMetadata::generate(id.clone(), &payload, user_id.clone(), device_id.clone(), options.parent_ids);
        let now = Utc::now();

        let transaction = Transaction {
            id,
            payload,
            status: TransactionStatus::Pending,
            priority: options.priority.unwrap_or(Priority::Normal),
            created_at: now,
            queued_at: now,
            sync_started_at: None,
            sync_completed_at: None,
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(self.config.default_max_attempts),
            last_error: None,
            server_transaction_id: None,
            user_id,
            device_id,
            related_transaction_ids: options.related_transaction_ids,
            metadata,
        };

        self.storage.put(&transaction).await?;
        self.events.emit(QueueEvent::Enqueued(transaction.clone()));
        Ok(transaction)
    }

    /// Returns the oldest `Pending` transaction and transitions it to
    /// `Syncing` in the same call — a dequeue is itself the hand-off to a
    /// sync attempt, so there's no separate "claim" step. A transaction
    /// entering `syncing` always carries `attempts >= 1`, so the increment
    /// happens here rather than on failure.
    pub async fn dequeue(&self) -> Result<Option<Transaction>, QueueError> {
        let page = self
            .storage
            .query(&TransactionFilter {
                statuses: Some(vec![TransactionStatus::Pending]),
                limit: Some(1),
                ..Default::default()
            })
            .await?;

        let Some(mut transaction) = page.transactions.into_iter().next() else {
            return Ok(None);
        };

        self.transition(&mut transaction, TransactionStatus::Syncing).await?;
        transaction.attempts += 1;
        transaction.sync_started_at = Some(Utc::now());
        self.storage.put(&transaction).await?;
        Ok(Some(transaction))
    }

    /// Like [`Self::dequeue`] but does not mutate state.
    pub async fn peek(&self) -> Result<Option<Transaction>, QueueError> {
        let page = self
            .storage
            .query(&TransactionFilter {
                statuses: Some(vec![TransactionStatus::Pending]),
                limit: Some(1),
                ..Default::default()
            })
            .await?;
        Ok(page.transactions.into_iter().next())
    }

    pub async fn get(&self, id: &TransactionId) -> Result<Transaction, QueueError> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| QueueError::TransactionNotFound(id.clone()))
    }

    pub async fn query(&self, filter: &TransactionFilter) -> Result<QueryPage, QueueError> {
        Ok(self.storage.query(filter).await?)
    }

    async fn transition(&self, transaction: &mut Transaction, to: TransactionStatus) -> Result<(), QueueError> {
        if !transaction.status.can_transition_to(to) {
            return Err(QueueError::InvalidStatusTransition {
                from: transaction.status,
                to,
            });
        }
        let from = transaction.status;
        transaction.status = to;
        self.events.emit(QueueEvent::StatusChanged { id: transaction.id.clone(), from, to });
        Ok(())
    }

    /// Marks a `Syncing` transaction `Synced`, recording the server-assigned id.
    pub async fn mark_synced(&self, id: &TransactionId, server_transaction_id: Option<String>) -> Result<Transaction, QueueError> {
        let mut transaction = self.get(id).await?;
        self.transition(&mut transaction, TransactionStatus::Synced).await?;
        transaction.sync_completed_at = Some(Utc::now());
        transaction.server_transaction_id = server_transaction_id;
        self.storage.put(&transaction).await?;
        Ok(transaction)
    }

    /// Marks a `Syncing` transaction `Failed` and records the error. The
    /// attempt counter was already incremented on `dequeue`, not here.
    /// Never drops the transaction even once `attempts` reaches
    /// `max_attempts` — a failed transaction is never silently lost, only
    /// left for a caller to retry or cancel.
    pub async fn mark_failed(&self, id: &TransactionId, error: impl Into<String>) -> Result<Transaction, QueueError> {
        let mut transaction = self.get(id).await?;
        self.transition(&mut transaction, TransactionStatus::Failed).await?;
        transaction.last_error = Some(error.into());
        self.storage.put(&transaction).await?;
        Ok(transaction)
    }

    /// Moves a `Failed` transaction back to `Pending` so it becomes
    /// sync-eligible again.
    pub async fn retry(&self, id: &TransactionId) -> Result<Transaction, QueueError> {
        let mut transaction = self.get(id).await?;
        self.transition(&mut transaction, TransactionStatus::Pending).await?;
        self.storage.put(&transaction).await?;
        Ok(transaction)
    }

    /// Cancels a `New` or `Pending` transaction; a transaction already
    /// `Syncing` cannot be cancelled out from under an in-flight request.
    pub async fn cancel(&self, id: &TransactionId) -> Result<Transaction, QueueError> {
        let mut transaction = self.get(id).await?;
        self.transition(&mut transaction, TransactionStatus::Cancelled).await?;
        self.storage.put(&transaction).await?;
        Ok(transaction)
    }

    pub async fn clear_synced(&self) -> Result<u64, QueueError> {
        let count = self
            .storage
            .clear(&TransactionFilter::with_status(TransactionStatus::Synced))
            .await?;
        self.events.emit(QueueEvent::Cleared { filter_description: "synced", count });
        Ok(count)
    }

    pub async fn clear_failed(&self) -> Result<u64, QueueError> {
        let count = self
            .storage
            .clear(&TransactionFilter::with_status(TransactionStatus::Failed))
            .await?;
        self.events.emit(QueueEvent::Cleared { filter_description: "failed", count });
        Ok(count)
    }

    pub async fn clear_all(&self) -> Result<u64, QueueError> {
        let count = self.storage.clear_all().await?;
        self.events.emit(QueueEvent::Cleared { filter_description: "all", count });
        Ok(count)
    }

    pub async fn get_stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for status in [
            TransactionStatus::New,
            TransactionStatus::Pending,
            TransactionStatus::Syncing,
            TransactionStatus::Synced,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            let count = self.storage.count(&TransactionFilter::with_status(status)).await?;
            stats.total += count;
            match status {
                TransactionStatus::New => stats.new = count,
                TransactionStatus::Pending => stats.pending = count,
                TransactionStatus::Syncing => stats.syncing = count,
                TransactionStatus::Synced => stats.synced = count,
                TransactionStatus::Failed => stats.failed = count,
                TransactionStatus::Cancelled => stats.cancelled = count,
            }
        }

        let pending_page = self
            .storage
            .query(&TransactionFilter::with_status(TransactionStatus::Pending))
            .await?;
        stats.oldest_pending_at = pending_page.transactions.first().map(|tx| tx.queued_at);
        stats.newest_pending_at = pending_page.transactions.last().map(|tx| tx.queued_at);

        let synced_page = self
            .storage
            .query(&TransactionFilter::with_status(TransactionStatus::Synced))
            .await?;
        let durations: Vec<i64> = synced_page
            .transactions
            .iter()
            .filter_map(|tx| match (tx.sync_started_at, tx.sync_completed_at) {
                (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
                _ => None,
            })
            .collect();
        stats.average_sync_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() / durations.len() as i64)
        };

        stats.capacity = self.config.max_size;
        stats.available_capacity = self.config.max_size.map(|capacity| capacity.saturating_sub(stats.total));

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryTransactionStorage;
    use serde_json::json;

    fn queue() -> TransactionQueue<InMemoryTransactionStorage> {
        TransactionQueue::new(Arc::new(InMemoryTransactionStorage::new()), QueueConfig::default())
    }

    #[tokio::test]
    async fn enqueue_starts_pending_and_dequeue_moves_to_syncing() {
        let q = queue();
        let payload = Payload::new("companies", "update", json!({"name": "Acme"}));
        let tx = q.enqueue(payload, "u1", "d1", EnqueueOptions::default()).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);

        let dequeued = q.dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.id, tx.id);
        assert_eq!(dequeued.status, TransactionStatus::Syncing);

        let stored = q.get(&tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Syncing);
    }

    #[tokio::test]
    async fn fifo_ordering_by_queued_at() {
        let q = queue();
        let first = q
            .enqueue(Payload::new("a", "update", json!({})), "u1", "d1", EnqueueOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let _second = q
            .enqueue(Payload::new("b", "update", json!({})), "u1", "d1", EnqueueOptions::default())
            .await
            .unwrap();

        let dequeued = q.dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.id, first.id);
    }

    #[tokio::test]
    async fn failed_transaction_can_be_retried_and_is_never_dropped() {
        let q = queue();
        let tx = q
            .enqueue(Payload::new("a", "update", json!({})), "u1", "d1", EnqueueOptions::default())
            .await
            .unwrap();
        q.dequeue().await.unwrap();
        let failed = q.mark_failed(&tx.id, "network error").await.unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.attempts, 1);

        let retried = q.retry(&tx.id).await.unwrap();
        assert_eq!(retried.status, TransactionStatus::Pending);
        assert!(q.get(&tx.id).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_syncing() {
        let q = queue();
        let tx = q
            .enqueue(Payload::new("a", "update", json!({})), "u1", "d1", EnqueueOptions::default())
            .await
            .unwrap();
        q.dequeue().await.unwrap();
        let result = q.cancel(&tx.id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn max_size_rejects_further_enqueue() {
        let q = TransactionQueue::new(
            Arc::new(InMemoryTransactionStorage::new()),
            QueueConfig { max_size: Some(1), default_max_attempts: 3 },
        );
        q.enqueue(Payload::new("a", "update", json!({})), "u1", "d1", EnqueueOptions::default())
            .await
            .unwrap();
        let result = q
            .enqueue(Payload::new("b", "update", json!({})), "u1", "d1", EnqueueOptions::default())
            .await;
        assert!(matches!(result, Err(QueueError::QueueFull { capacity: 1 })));
    }
}
