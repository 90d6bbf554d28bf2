//! The sync engine (§4.5): drains pending transactions from the queue in
//! batches, POSTs them to a remote endpoint as either a compact delta view
//! or the full transaction, and reconciles the three-list response back into
//! per-transaction outcomes — including conflict detection against the
//! metadata the server returns. Named `syncengine` rather than `sync` to
//! avoid colliding with `std::sync` in `use` paths throughout the crate.

use crate::error::SyncError;
use crate::events::{Publisher, Subscription};
use crate::metadata::{ConflictKind, ConflictMetadata, ConflictResult, Resolution};
use crate::network::{ConnectivityState, NetworkDetector, NetworkEvent};
use crate::queue::TransactionQueue;
use crate::storage::{TransactionFilter, TransactionStorage};
use crate::transaction::{Transaction, TransactionId, TransactionStatus};
use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub endpoint: String,
    pub batch_size: usize,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    /// Send the compact delta view (§4.5c) instead of the full transaction body.
    pub enable_delta_sync: bool,
    /// Start a sync run automatically once the network detector reports `online`.
    pub auto_sync_on_reconnect: bool,
    /// Re-queue a transaction the server reported `failed` for another
    /// attempt, as long as `attempts < max_attempts`.
    pub retry_failed_transactions: bool,
    /// How many batches a single `sync()` run may have in flight at once.
    pub max_concurrent_batches: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.example.com/sync".to_string(),
            batch_size: 25,
            sync_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            enable_delta_sync: true,
            auto_sync_on_reconnect: true,
            retry_failed_transactions: true,
            max_concurrent_batches: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Paused,
    Offline,
}

#[derive(Debug, Clone, Default)]
pub struct SyncProgress {
    pub pending: u64,
    pub in_flight: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub total_synced: u64,
    pub total_failed: u64,
    pub total_conflicts: u64,
    pub batches_run: u64,
    pub last_batch_duration_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: String,
    pub synced: Vec<TransactionId>,
    pub failed: Vec<(TransactionId, String)>,
    pub conflicts: Vec<(TransactionId, ConflictResult)>,
}

impl BatchResult {
    fn empty(batch_id: String) -> Self {
        Self {
            batch_id,
            synced: vec![],
            failed: vec![],
            conflicts: vec![],
        }
    }

    fn made_progress(&self) -> bool {
        !self.synced.is_empty() || !self.failed.is_empty() || !self.conflicts.is_empty()
    }
}

/// Emitted after each completed batch (§4.5 step 4).
#[derive(Debug, Clone)]
pub struct SyncProgressEvent {
    pub current_batch: u64,
    pub total_batches: u64,
    pub synced_count: u64,
    pub failed_count: u64,
    pub conflict_count: u64,
    pub percent_complete: f64,
    pub estimated_time_remaining_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    BatchStarted { batch_id: String, batch_size: usize },
    BatchCompleted(BatchResult),
    BatchFailed { batch_id: String, reason: String },
    Progress(SyncProgressEvent),
    Idle,
    Paused,
    Resumed,
    Failed(String),
    AuthRequired,
}

/// The compact wire shape sent when `enable_delta_sync` is on (§4.5c):
/// `{id, type, payload, timestamp, version?, contentHash?, attempts?, maxAttempts?}`.
/// `attempts`/`maxAttempts` are included only once a transaction has actually
/// been retried (`attempts > 1`) — a first attempt never needs them.
fn to_delta_view(tx: &Transaction) -> serde_json::Value {
    let mut value = serde_json::json!({
        "id": tx.id.to_string(),
        "type": tx.transaction_type(),
        "payload": tx.payload,
        "timestamp": tx.metadata.device_timestamp,
        "version": tx.metadata.version,
        "contentHash": tx.metadata.content_hash,
    });
    if tx.attempts > 1 {
        value["attempts"] = serde_json::json!(tx.attempts);
        value["maxAttempts"] = serde_json::json!(tx.max_attempts);
    }
    value
}

fn to_full_transaction(tx: &Transaction) -> serde_json::Value {
    serde_json::to_value(tx).expect("transaction must serialize to JSON")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    batch_id: String,
    transactions: Vec<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct SyncResponse {
    #[serde(default)]
    synced: Vec<SyncedEntry>,
    #[serde(default)]
    failed: Vec<FailedEntry>,
    #[serde(default)]
    conflicts: Vec<ConflictEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncedEntry {
    transaction_id: String,
    server_transaction_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailedEntry {
    transaction_id: String,
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictEntry {
    transaction_id: String,
    #[allow(dead_code)]
    current_version: u64,
    conflict_data: Option<ConflictData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictData {
    version: u64,
    content_hash: String,
    server_timestamp: DateTime<Utc>,
    device_id: String,
    #[serde(default)]
    parent_ids: Vec<Uuid>,
}

/// A caller-supplied check for whether the current session is still valid.
/// Consulted before each sync run; a `false` result short-circuits it with
/// [`SyncError::AuthRequired`] instead of attempting a doomed request.
pub type SessionValidHook = Arc<dyn Fn() -> bool + Send + Sync>;

struct Inner {
    status: SyncStatus,
    stats: SyncStats,
    last_sync_at: Option<DateTime<Utc>>,
}

pub struct SyncEngine<S: TransactionStorage> {
    config: SyncConfig,
    client: reqwest::Client,
    queue: Arc<TransactionQueue<S>>,
    network: Option<Arc<NetworkDetector>>,
    is_session_valid: SessionValidHook,
    events: Publisher<SyncEvent>,
    inner: RwLock<Inner>,
    running: AtomicBool,
    syncing: AtomicBool,
    paused: AtomicBool,
    task: RwLock<Option<JoinHandle<()>>>,
    shutdown: RwLock<Option<tokio::sync::oneshot::Sender<()>>>,
    reconnect_subscription: RwLock<Option<Subscription>>,
}

impl<S: TransactionStorage + 'static> SyncEngine<S> {
    pub fn new(
        config: SyncConfig,
        queue: Arc<TransactionQueue<S>>,
        network: Option<Arc<NetworkDetector>>,
        is_session_valid: SessionValidHook,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            config,
            client,
            queue,
            network,
            is_session_valid,
            events: Publisher::new(),
            inner: RwLock::new(Inner {
                status: SyncStatus::Idle,
                stats: SyncStats::default(),
                last_sync_at: None,
            }),
            running: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            task: RwLock::new(None),
            shutdown: RwLock::new(None),
            reconnect_subscription: RwLock::new(None),
        })
    }

    pub fn events(&self) -> &Publisher<SyncEvent> {
        &self.events
    }

    pub async fn initialize(&self) -> Result<(), SyncError> {
        self.queue.initialize().await?;
        Ok(())
    }

    pub async fn get_status(&self) -> SyncStatus {
        self.inner.read().await.status
    }

    pub async fn get_stats(&self) -> SyncStats {
        self.inner.read().await.stats.clone()
    }

    pub async fn get_progress(&self) -> Result<SyncProgress, SyncError> {
        let pending = self.queue.query(&TransactionFilter::with_status(TransactionStatus::Pending)).await?.total_count;
        let in_flight = self.queue.query(&TransactionFilter::with_status(TransactionStatus::Syncing)).await?.total_count;
        let inner = self.inner.read().await;
        Ok(SyncProgress {
            pending,
            in_flight,
            last_sync_at: inner.last_sync_at,
        })
    }

    pub async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.inner.write().await.status = SyncStatus::Paused;
        self.events.emit(SyncEvent::Paused);
    }

    pub async fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.inner.write().await.status = SyncStatus::Idle;
        self.events.emit(SyncEvent::Resumed);
    }

    /// Spawns the periodic sync loop and, when `auto_sync_on_reconnect` is
    /// on and a network detector was supplied, subscribes to its `online`
    /// transition to trigger an immediate sync on reconnect. Idempotent.
    pub async fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if self.config.auto_sync_on_reconnect {
            if let Some(network) = &self.network {
                let engine = Arc::clone(self);
                let subscription = network.events().subscribe(move |event| {
                    if let NetworkEvent::StateChanged { to: ConnectivityState::Online, .. } = event {
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move {
                            if let Err(e) = engine.sync().await {
                                log::warn!("auto-sync on reconnect failed: {e}");
                            }
                        });
                    }
                });
                *self.reconnect_subscription.write().await = Some(subscription);
            }
        }

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        *self.shutdown.write().await = Some(tx);

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = tokio::time::sleep(engine.config.sync_interval) => {
                        if let Err(e) = engine.sync().await {
                            log::warn!("sync run failed: {e}");
                        }
                    }
                }
            }
        });
        *self.task.write().await = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SyncError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(network) = &self.network {
            if let Some(subscription) = self.reconnect_subscription.write().await.take() {
                network.events().unsubscribe(subscription);
            }
        }
        if let Some(tx) = self.shutdown.write().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task.write().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Runs sync batches until the pending queue is drained, a batch yields
    /// no progress, or a batch fails outright. If a run is already in
    /// progress, returns an empty list without starting a second one (§4.5).
    /// Honors `paused`, the network detector's observed state (if supplied),
    /// and the session-valid hook.
    pub async fn sync(&self) -> Result<Vec<BatchResult>, SyncError> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let outcome = self.sync_inner().await;
        self.syncing.store(false, Ordering::SeqCst);
        outcome
    }

    async fn sync_inner(&self) -> Result<Vec<BatchResult>, SyncError> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        if let Some(network) = &self.network {
            if network.state().await != ConnectivityState::Online {
                self.inner.write().await.status = SyncStatus::Offline;
                return Ok(Vec::new());
            }
        }
        if !(self.is_session_valid)() {
            self.events.emit(SyncEvent::AuthRequired);
            return Err(SyncError::AuthRequired);
        }

        self.inner.write().await.status = SyncStatus::Syncing;
        self.events.emit(SyncEvent::Started);

        let total_pending = self.queue.query(&TransactionFilter::with_status(TransactionStatus::Pending)).await?.total_count;
        let total_batches = if total_pending == 0 {
            0
        } else {
            (total_pending + self.config.batch_size as u64 - 1) / self.config.batch_size as u64
        };

        let mut results = Vec::new();
        let mut current_batch: u64 = 0;
        let mut synced_count = 0u64;
        let mut failed_count = 0u64;
        let mut conflict_count = 0u64;
        let mut average_batch_duration_ms: Option<i64> = None;

        let mut batch_started_at: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut in_flight = FuturesUnordered::new();
        loop {
            while in_flight.len() < self.config.max_concurrent_batches.max(1) {
                let batch = self.drain_batch().await?;
                if batch.is_empty() {
                    break;
                }
                let batch_id = Uuid::new_v4().to_string();
                batch_started_at.insert(batch_id.clone(), Utc::now());
                self.events.emit(SyncEvent::BatchStarted { batch_id: batch_id.clone(), batch_size: batch.len() });
                let failed_batch_id = batch_id.clone();
                in_flight.push(async move { self.run_batch(batch_id, batch).await.map_err(|e| (failed_batch_id, e)) });
            }

            if in_flight.is_empty() {
                break;
            }

            let outcome = in_flight.next().await.expect("in_flight is non-empty");
            match outcome {
                Ok(result) => {
                    current_batch += 1;
                    synced_count += result.synced.len() as u64;
                    failed_count += result.failed.len() as u64;
                    conflict_count += result.conflicts.len() as u64;

                    let batch_start = batch_started_at.remove(&result.batch_id).unwrap_or_else(Utc::now);
                    let duration_ms = (Utc::now() - batch_start).num_milliseconds().max(0);
                    average_batch_duration_ms = Some(match average_batch_duration_ms {
                        Some(avg) => (avg + duration_ms) / 2,
                        None => duration_ms,
                    });

                    {
                        let mut inner = self.inner.write().await;
                        inner.stats.batches_run += 1;
                        inner.stats.total_synced += result.synced.len() as u64;
                        inner.stats.total_failed += result.failed.len() as u64;
                        inner.stats.total_conflicts += result.conflicts.len() as u64;
                        inner.stats.last_batch_duration_ms = Some(duration_ms);
                        inner.last_sync_at = Some(Utc::now());
                    }

                    let made_progress = result.made_progress();
                    self.events.emit(SyncEvent::BatchCompleted(result.clone()));

                    let remaining_batches = total_batches.saturating_sub(current_batch);
                    let percent_complete = if total_batches == 0 {
                        100.0
                    } else {
                        (current_batch as f64 / total_batches as f64) * 100.0
                    };
                    self.events.emit(SyncEvent::Progress(SyncProgressEvent {
                        current_batch,
                        total_batches,
                        synced_count,
                        failed_count,
                        conflict_count,
                        percent_complete,
                        estimated_time_remaining_ms: average_batch_duration_ms.map(|avg| avg * remaining_batches as i64),
                    }));

                    results.push(result);
                    if !made_progress {
                        break;
                    }
                }
                Err((batch_id, e)) => {
                    batch_started_at.remove(&batch_id);
                    self.events.emit(SyncEvent::BatchFailed { batch_id, reason: e.to_string() });
                    self.events.emit(SyncEvent::Failed(e.to_string()));
                    self.inner.write().await.status = SyncStatus::Idle;
                    return Err(e);
                }
            }
        }

        self.inner.write().await.status = SyncStatus::Idle;
        self.events.emit(SyncEvent::Idle);
        Ok(results)
    }

    async fn drain_batch(&self) -> Result<Vec<Transaction>, SyncError> {
        let mut batch = Vec::with_capacity(self.config.batch_size);
        for _ in 0..self.config.batch_size {
            match self.queue.dequeue().await? {
                Some(tx) => batch.push(tx),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Sends one batch and reconciles the response. Transport errors,
    /// non-2xx statuses (other than 401), and malformed bodies are returned
    /// as `Err` rather than marked against the batch's transactions — those
    /// stay `syncing`, to be picked up by whatever restart-recovery rule
    /// reclaims stuck in-flight transactions, not silently reverted here.
    async fn run_batch(&self, batch_id: String, batch: Vec<Transaction>) -> Result<BatchResult, SyncError> {
        let transactions: Vec<serde_json::Value> = batch
            .iter()
            .map(|tx| if self.config.enable_delta_sync { to_delta_view(tx) } else { to_full_transaction(tx) })
            .collect();

        let request = SyncRequest { batch_id: batch_id.clone(), transactions };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::TimeoutError
                } else {
                    SyncError::NetworkError(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.events.emit(SyncEvent::AuthRequired);
            return Err(SyncError::AuthRequired);
        }
        if !response.status().is_success() {
            return Err(SyncError::ServerError(format!("server responded with status {}", response.status())));
        }

        let parsed: SyncResponse = response.json().await.map_err(|e| SyncError::ServerError(e.to_string()))?;

        self.reconcile(batch_id, batch, parsed).await
    }

    async fn reconcile(&self, batch_id: String, batch: Vec<Transaction>, response: SyncResponse) -> Result<BatchResult, SyncError> {
        let mut result = BatchResult::empty(batch_id);
        let by_id: HashMap<String, Transaction> = batch.into_iter().map(|tx| (tx.id.to_string(), tx)).collect();

        for entry in response.synced {
            if let Some(tx) = by_id.get(&entry.transaction_id) {
                self.queue.mark_synced(&tx.id, entry.server_transaction_id).await?;
                result.synced.push(tx.id.clone());
            }
        }

        for entry in response.failed {
            if let Some(tx) = by_id.get(&entry.transaction_id) {
                let updated = self.queue.mark_failed(&tx.id, entry.error.clone()).await?;
                self.maybe_auto_retry(&updated).await?;
                result.failed.push((tx.id.clone(), entry.error));
            }
        }

        for entry in response.conflicts {
            if let Some(tx) = by_id.get(&entry.transaction_id) {
                let conflict = match entry.conflict_data {
                    Some(remote) => {
                        let remote_metadata = ConflictMetadata {
                            transaction_id: tx.id.clone(),
                            version: remote.version,
                            server_timestamp: Some(remote.server_timestamp),
                            device_timestamp: remote.server_timestamp,
                            content_hash: remote.content_hash,
                            parent_ids: remote.parent_ids.into_iter().map(TransactionId).collect(),
                            last_modified: remote.server_timestamp,
                            created_at: tx.metadata.created_at,
                            user_id: tx.user_id.clone(),
                            device_id: remote.device_id,
                        };
                        crate::metadata::detect(&tx.metadata, &remote_metadata)
                    }
                    // No detailed remote metadata to classify against; treat
                    // as an unresolved version mismatch requiring a manual look.
                    None => ConflictResult { kind: ConflictKind::VersionMismatch, resolution: Resolution::Manual },
                };
                let updated = self
                    .queue
                    .mark_failed(&tx.id, format!("Conflict detected: {:?}", conflict.kind))
                    .await?;
                self.maybe_auto_retry(&updated).await?;
                result.conflicts.push((tx.id.clone(), conflict));
            }
        }

        Ok(result)
    }

    async fn maybe_auto_retry(&self, transaction: &Transaction) -> Result<(), SyncError> {
        if self.config.retry_failed_transactions && transaction.attempts < transaction.max_attempts {
            self.queue.retry(&transaction.id).await?;
        }
        Ok(())
    }
}
