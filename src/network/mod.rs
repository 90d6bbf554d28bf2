//! Network reconnection detector (§4.4): tracks online/offline state via a
//! debounced active probe, backing off linearly on repeated probe failures.
//! Owns its own background task and cancellation signal rather than reaching
//! for a process-wide singleton, unlike the teacher's `OnceLock`-based
//! database handle.

use crate::error::NetworkError;
use crate::events::Publisher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
    Transitioning,
}

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    StateChanged {
        from: ConnectivityState,
        to: ConnectivityState,
    },
    ProbeFailed {
        consecutive_failures: u32,
    },
    ProbeSucceeded,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub probe_url: String,
    /// How long a probe result must hold before the reported state flips —
    /// avoids flapping between Online/Offline on a single noisy probe.
    pub debounce: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// Linear backoff step applied to `probe_interval` per consecutive failure.
    pub backoff_step: Duration,
    pub max_backoff: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://connectivitycheck.example.com/generate_204".to_string(),
            debounce: Duration::from_millis(500),
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            backoff_step: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub total_probes: u64,
    pub successful_probes: u64,
    pub consecutive_failures: u32,
    pub state_transitions: u64,
}

struct Inner {
    state: ConnectivityState,
    stats: NetworkStats,
}

pub struct NetworkDetector {
    config: NetworkConfig,
    client: reqwest::Client,
    inner: RwLock<Inner>,
    events: Publisher<NetworkEvent>,
    running: AtomicBool,
    task: RwLock<Option<JoinHandle<()>>>,
    shutdown: RwLock<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl NetworkDetector {
    pub fn new(config: NetworkConfig) -> Result<Self, NetworkError> {
        if config.probe_url.is_empty() {
            return Err(NetworkError::InvalidConfig("probe_url must not be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| NetworkError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            config,
            client,
            inner: RwLock::new(Inner {
                state: ConnectivityState::Offline,
                stats: NetworkStats::default(),
            }),
            events: Publisher::new(),
            running: AtomicBool::new(false),
            task: RwLock::new(None),
            shutdown: RwLock::new(None),
        })
    }

    pub fn events(&self) -> &Publisher<NetworkEvent> {
        &self.events
    }

    pub async fn state(&self) -> ConnectivityState {
        self.inner.read().await.state
    }

    pub async fn stats(&self) -> NetworkStats {
        self.inner.read().await.stats.clone()
    }

    pub async fn initialize(&self) -> Result<(), NetworkError> {
        self.check_connectivity().await?;
        Ok(())
    }

    /// Spawns the background probe loop. A second call while already running
    /// is a no-op rather than an error — `start` is idempotent.
    pub async fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        *self.shutdown.write().await = Some(tx);

        let detector = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = detector.config.probe_interval;
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = tokio::time::sleep(interval) => {
                        match detector.check_connectivity().await {
                            Ok(ConnectivityState::Online) => {
                                interval = detector.config.probe_interval;
                            }
                            _ => {
                                let failures = detector.inner.read().await.stats.consecutive_failures;
                                let backoff = detector.config.backoff_step * failures;
                                interval = (detector.config.probe_interval + backoff).min(detector.config.max_backoff);
                            }
                        }
                    }
                }
            }
        });
        *self.task.write().await = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), NetworkError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.write().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task.write().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Runs a single probe immediately, applies the debounce rule, and
    /// returns the resulting (possibly unchanged) state.
    pub async fn check_connectivity(&self) -> Result<ConnectivityState, NetworkError> {
        let probe_result = self.probe_once().await;

        let mut inner = self.inner.write().await;
        inner.stats.total_probes += 1;

        let observed = match &probe_result {
            Ok(()) => {
                inner.stats.successful_probes += 1;
                inner.stats.consecutive_failures = 0;
                self.events.emit(NetworkEvent::ProbeSucceeded);
                ConnectivityState::Online
            }
            Err(_) => {
                inner.stats.consecutive_failures += 1;
                self.events.emit(NetworkEvent::ProbeFailed {
                    consecutive_failures: inner.stats.consecutive_failures,
                });
                ConnectivityState::Offline
            }
        };

        if observed != inner.state {
            let from = inner.state;
            inner.state = ConnectivityState::Transitioning;
            drop(inner);
            tokio::time::sleep(self.config.debounce).await;

            let confirm = self.probe_once().await.is_ok();
            let confirmed = if confirm { ConnectivityState::Online } else { ConnectivityState::Offline };

            let mut inner = self.inner.write().await;
            if confirmed != from {
                inner.state = confirmed;
                inner.stats.state_transitions += 1;
                self.events.emit(NetworkEvent::StateChanged { from, to: confirmed });
            } else {
                inner.state = from;
            }
            Ok(inner.state)
        } else {
            Ok(observed)
        }
    }

    async fn probe_once(&self) -> Result<(), NetworkError> {
        let response = self
            .client
            .get(&self.config.probe_url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| NetworkError::PingFailed(e.to_string()))?;

        if response.status().is_success() || response.status().as_u16() == 204 {
            Ok(())
        } else {
            Err(NetworkError::PingFailed(format!("probe returned status {}", response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_rejects_empty_probe_url() {
        let config = NetworkConfig { probe_url: String::new(), ..Default::default() };
        let result = NetworkDetector::new(config);
        assert!(matches!(result, Err(NetworkError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn initial_state_is_offline() {
        let detector = NetworkDetector::new(NetworkConfig::default()).unwrap();
        assert_eq!(detector.state().await, ConnectivityState::Offline);
    }
}
