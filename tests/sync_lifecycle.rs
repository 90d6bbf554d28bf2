use driftline_sync::{
    EnqueueOptions, InMemoryTransactionStorage, NetworkConfig, NetworkDetector, Payload, QueueConfig,
    SyncConfig, SyncEngine, SyncStatus, TransactionQueue,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn always_authenticated() -> Arc<dyn Fn() -> bool + Send + Sync> {
    Arc::new(|| true)
}

async fn new_queue() -> Arc<TransactionQueue<InMemoryTransactionStorage>> {
    let queue = TransactionQueue::new(Arc::new(InMemoryTransactionStorage::new()), QueueConfig::default());
    queue.initialize().await.unwrap();
    Arc::new(queue)
}

#[tokio::test]
async fn enqueued_transaction_syncs_successfully() {
    let server = MockServer::start().await;
    let queue = new_queue().await;

    let tx = queue
        .enqueue(
            Payload::new("companies", "update", json!({"name": "Acme"})),
            "user-1",
            "device-1",
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    // Request must carry the delta view, not the student's own invented shape:
    // a batchId envelope around id/type/payload/timestamp, no bare resource/action/data.
    Mock::given(method("POST"))
        .and(path("/sync"))
        .and(body_partial_json(json!({
            "transactions": [
                { "id": tx.id.to_string(), "type": "update" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "synced": [
                { "transactionId": tx.id.to_string(), "serverTransactionId": "srv-1" }
            ],
            "failed": [],
            "conflicts": []
        })))
        .mount(&server)
        .await;

    let config = SyncConfig {
        endpoint: format!("{}/sync", server.uri()),
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(config, queue.clone(), None, always_authenticated()).unwrap();
    engine.initialize().await.unwrap();
    let results = engine.sync().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].synced, vec![tx.id.clone()]);

    let stored = queue.get(&tx.id).await.unwrap();
    assert_eq!(stored.status, driftline_sync::TransactionStatus::Synced);
    assert_eq!(stored.server_transaction_id.as_deref(), Some("srv-1"));

    let stats = engine.get_stats().await;
    assert_eq!(stats.total_synced, 1);
    assert_eq!(engine.get_status().await, SyncStatus::Idle);
}

#[tokio::test]
async fn server_side_conflict_is_reported_and_marked_failed() {
    let server = MockServer::start().await;
    let queue = new_queue().await;

    let tx = queue
        .enqueue(
            Payload::new("companies", "update", json!({"name": "Acme"})),
            "user-1",
            "device-1",
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "synced": [],
            "failed": [],
            "conflicts": [
                {
                    "transactionId": tx.id.to_string(),
                    "currentVersion": 4,
                    "conflictData": {
                        "version": 4,
                        "contentHash": "f".repeat(64),
                        "serverTimestamp": chrono::Utc::now().to_rfc3339(),
                        "deviceId": "device-2",
                        "parentIds": []
                    }
                }
            ]
        })))
        .mount(&server)
        .await;

    let config = SyncConfig {
        endpoint: format!("{}/sync", server.uri()),
        // Retry is disabled here so the transaction's terminal `failed` state
        // (rather than an immediate auto-requeue to `pending`) is observable.
        retry_failed_transactions: false,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(config, queue.clone(), None, always_authenticated()).unwrap();
    let results = engine.sync().await.unwrap();
    assert_eq!(results[0].conflicts.len(), 1);

    let stats = engine.get_stats().await;
    assert_eq!(stats.total_conflicts, 1);

    let stored = queue.get(&tx.id).await.unwrap();
    assert_eq!(stored.status, driftline_sync::TransactionStatus::Failed);
    assert!(stored.last_error.as_deref().unwrap().starts_with("Conflict detected"));
}

#[tokio::test]
async fn failed_transaction_is_auto_retried_when_enabled() {
    let server = MockServer::start().await;
    let queue = new_queue().await;

    let tx = queue
        .enqueue(
            Payload::new("companies", "update", json!({"name": "Acme"})),
            "user-1",
            "device-1",
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "synced": [],
            "failed": [{ "transactionId": tx.id.to_string(), "error": "validation failed" }],
            "conflicts": []
        })))
        .mount(&server)
        .await;

    let config = SyncConfig {
        endpoint: format!("{}/sync", server.uri()),
        retry_failed_transactions: true,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(config, queue.clone(), None, always_authenticated()).unwrap();
    engine.sync().await.unwrap();

    let stored = queue.get(&tx.id).await.unwrap();
    assert_eq!(stored.status, driftline_sync::TransactionStatus::Pending);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn server_error_aborts_run_without_reverting_in_flight_transactions() {
    let server = MockServer::start().await;
    let queue = new_queue().await;

    let tx = queue
        .enqueue(
            Payload::new("companies", "update", json!({"name": "Acme"})),
            "user-1",
            "device-1",
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = SyncConfig {
        endpoint: format!("{}/sync", server.uri()),
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(config, queue.clone(), None, always_authenticated()).unwrap();
    let result = engine.sync().await;
    assert!(matches!(result, Err(driftline_sync::SyncError::ServerError(_))));

    // The transaction was dequeued (and thus `syncing`) before the POST
    // failed; the abort path must leave it there rather than marking it failed.
    let stored = queue.get(&tx.id).await.unwrap();
    assert_eq!(stored.status, driftline_sync::TransactionStatus::Syncing);

    let stats = engine.get_stats().await;
    assert_eq!(stats.total_failed, 0);
}

#[tokio::test]
async fn offline_network_detector_skips_sync() {
    let server = MockServer::start().await;
    let queue = new_queue().await;

    queue
        .enqueue(
            Payload::new("companies", "update", json!({"name": "Acme"})),
            "user-1",
            "device-1",
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    // No mock registered for /sync: if the engine ignored the offline
    // detector and sent a request anyway, wiremock would panic on an
    // unmatched request once the server is dropped.
    let network = Arc::new(NetworkDetector::new(NetworkConfig::default()).unwrap());
    let config = SyncConfig {
        endpoint: format!("{}/sync", server.uri()),
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(config, queue.clone(), Some(network), always_authenticated()).unwrap();
    let results = engine.sync().await.unwrap();
    assert!(results.is_empty());

    assert_eq!(engine.get_status().await, SyncStatus::Offline);
    let stats = engine.get_stats().await;
    assert_eq!(stats.total_synced, 0);
}

#[tokio::test]
async fn invalid_session_short_circuits_with_auth_required() {
    let server = MockServer::start().await;
    let queue = new_queue().await;
    queue
        .enqueue(
            Payload::new("companies", "update", json!({"name": "Acme"})),
            "user-1",
            "device-1",
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let config = SyncConfig {
        endpoint: format!("{}/sync", server.uri()),
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(config, queue.clone(), None, Arc::new(|| false)).unwrap();
    let result = engine.sync().await;
    assert!(matches!(result, Err(driftline_sync::SyncError::AuthRequired)));
}
