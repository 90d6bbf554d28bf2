//! In-memory reference storage, grounded on the `MockStorage` test double
//! pattern used for sync integration tests in the pack. Backed by `dashmap`
//! rather than a `Mutex<HashMap<_>>` so concurrent queue operations don't
//! serialize on a single lock, matching the teacher's declared (if unused)
//! `dashmap` dependency.

use super::{QueryPage, StorageError, TransactionFilter, TransactionStorage};
use crate::transaction::{Transaction, TransactionId};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryTransactionStorage {
    records: DashMap<TransactionId, Transaction>,
}

impl InMemoryTransactionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStorage for InMemoryTransactionStorage {
    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, StorageError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, transaction: &Transaction) -> Result<(), StorageError> {
        self.records.insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn delete(&self, id: &TransactionId) -> Result<(), StorageError> {
        self.records.remove(id);
        Ok(())
    }

    async fn query(&self, filter: &TransactionFilter) -> Result<QueryPage, StorageError> {
        let mut matched: Vec<Transaction> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|tx| filter.matches(tx))
            .collect();
        matched.sort_by_key(|tx| tx.queued_at);

        let total_count = matched.len() as u64;
        let offset = filter.offset.unwrap_or(0) as usize;
        let page: Vec<Transaction> = match filter.limit {
            Some(limit) => matched.into_iter().skip(offset).take(limit as usize).collect(),
            None => matched.into_iter().skip(offset).collect(),
        };
        let has_more = offset as u64 + page.len() as u64 < total_count;

        Ok(QueryPage {
            transactions: page,
            total_count,
            has_more,
        })
    }

    async fn count(&self, filter: &TransactionFilter) -> Result<u64, StorageError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count() as u64)
    }

    async fn clear(&self, filter: &TransactionFilter) -> Result<u64, StorageError> {
        let ids: Vec<TransactionId> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        let count = ids.len() as u64;
        for id in ids {
            self.records.remove(&id);
        }
        Ok(count)
    }

    async fn clear_all(&self) -> Result<u64, StorageError> {
        let count = self.records.len() as u64;
        self.records.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ConflictMetadata;
    use crate::payload::Payload;
    use crate::transaction::{Priority, TransactionStatus};
    use chrono::Utc;
    use serde_json::json;

    fn sample_transaction(status: TransactionStatus) -> Transaction {
        let now = Utc::now();
        let id = TransactionId::new();
        let payload = Payload::new("companies", "update", json!({"name": "Acme"}));
        let metadata = ConflictMetadata::generate(id.clone(), &payload, "user-1", "device-1", vec![]);
        Transaction {
            id: id.clone(),
            payload,
            status,
            priority: Priority::Normal,
            created_at: now,
            queued_at: now,
            sync_started_at: None,
            sync_completed_at: None,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            server_transaction_id: None,
            user_id: "user-1".into(),
            device_id: "device-1".into(),
            related_transaction_ids: vec![],
            metadata,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let storage = InMemoryTransactionStorage::new();
        let tx = sample_transaction(TransactionStatus::New);
        storage.put(&tx).await.unwrap();
        let fetched = storage.get(&tx.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, tx.id);
    }

    #[tokio::test]
    async fn query_filters_by_status() {
        let storage = InMemoryTransactionStorage::new();
        storage.put(&sample_transaction(TransactionStatus::New)).await.unwrap();
        storage.put(&sample_transaction(TransactionStatus::Pending)).await.unwrap();

        let page = storage
            .query(&TransactionFilter::with_status(TransactionStatus::Pending))
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.transactions[0].status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn clear_all_empties_store() {
        let storage = InMemoryTransactionStorage::new();
        storage.put(&sample_transaction(TransactionStatus::New)).await.unwrap();
        let removed = storage.clear_all().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.count(&TransactionFilter::default()).await.unwrap(), 0);
    }
}
