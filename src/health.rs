//! Health snapshots and the background prober that produces them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::provider::Provider;
use crate::state_store::StateStore;

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_DEADLINE: Duration = Duration::from_secs(5);
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(30);

fn health_key(provider: &str) -> String {
    format!("health:{provider}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub last_check_unix_ms: u64,
    pub last_probe_latency_ms: u64,
    pub error: Option<String>,
}

impl HealthSnapshot {
    pub fn healthy(latency: Duration) -> Self {
        Self { healthy: true, last_check_unix_ms: now_unix_ms(), last_probe_latency_ms: latency.as_millis() as u64, error: None }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self { healthy: false, last_check_unix_ms: now_unix_ms(), last_probe_latency_ms: 0, error: Some(error.into()) }
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Looks up the most recent snapshot for a provider. A missing or expired
/// entry is treated as healthy (spec.md §4.2: "a missing snapshot is treated
/// as healthy (fail-open on probe lag)").
pub async fn is_healthy(store: &dyn StateStore, provider: &str) -> bool {
    match store.get(&health_key(provider)).await {
        Ok(Some(bytes)) => serde_json::from_slice::<HealthSnapshot>(&bytes).map(|s| s.healthy).unwrap_or(true),
        _ => true,
    }
}

/// Background task that periodically probes every provider and records the
/// verdict. Fans out concurrently so one slow provider never delays the
/// others (spec.md §4.5).
pub struct HealthProber {
    providers: Vec<Provider>,
    store: Arc<dyn StateStore>,
    interval: Duration,
    probe_deadline: Duration,
    snapshot_ttl: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl HealthProber {
    pub fn new(providers: Vec<Provider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            providers,
            store,
            interval: DEFAULT_PROBE_INTERVAL,
            probe_deadline: DEFAULT_PROBE_DEADLINE,
            snapshot_ttl: DEFAULT_HEALTH_TTL,
            metrics: None,
        }
    }

    /// Feeds each probe verdict into the `proxy_provider_healthy` gauge.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe_deadline(mut self, deadline: Duration) -> Self {
        self.probe_deadline = deadline;
        self
    }

    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    /// Spawns the prober loop. The first cycle runs immediately, not after
    /// one interval (spec.md §4.5). `cancel` stops the loop within one
    /// interval of being triggered.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("health prober stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.probe_once().await;
                    }
                }
            }
        })
    }

    async fn probe_once(&self) {
        let futures = self.providers.iter().map(|provider| async move {
            let snapshot = match tokio::time::timeout(self.probe_deadline, provider.probe()).await {
                Ok(snapshot) => snapshot,
                Err(_) => HealthSnapshot::unhealthy("probe deadline exceeded"),
            };
            (provider.name().to_string(), snapshot)
        });

        for (name, snapshot) in futures::future::join_all(futures).await {
            tracing::info!(provider = %name, healthy = snapshot.healthy, latency_ms = snapshot.last_probe_latency_ms, "health probe");
            if let Some(metrics) = &self.metrics {
                metrics.set_provider_health(&name, snapshot.healthy);
            }
            let encoded = match serde_json::to_vec(&snapshot) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "failed to encode health snapshot");
                    continue;
                }
            };
            if let Err(e) = self.store.set(&health_key(&name), encoded, self.snapshot_ttl).await {
                tracing::warn!(provider = %name, error = %e, "failed to write health snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::InMemoryStore;

    #[tokio::test]
    async fn missing_snapshot_is_healthy() {
        let store = InMemoryStore::new();
        assert!(is_healthy(&store, "unknown").await);
    }

    #[tokio::test]
    async fn unhealthy_snapshot_is_respected() {
        let store = InMemoryStore::new();
        let snapshot = HealthSnapshot::unhealthy("boom");
        store.set("health:a", serde_json::to_vec(&snapshot).unwrap(), Duration::from_secs(30)).await.unwrap();
        assert!(!is_healthy(&store, "a").await);
    }

    #[tokio::test]
    async fn expired_snapshot_fails_open() {
        let store = InMemoryStore::new();
        let snapshot = HealthSnapshot::unhealthy("boom");
        store.set("health:a", serde_json::to_vec(&snapshot).unwrap(), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(is_healthy(&store, "a").await);
    }

    #[tokio::test]
    async fn probe_once_feeds_the_health_gauge() {
        use crate::provider::{Provider, ProviderDescriptor};

        let provider = Provider::new(
            ProviderDescriptor { name: "a".into(), url: "http://127.0.0.1:1".into(), priority: 0, cost_per_request: 0.0 },
            reqwest::Client::new(),
        )
        .with_forward_timeout(Duration::from_millis(200));
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let prober = HealthProber::new(vec![provider], store.clone())
            .with_probe_deadline(Duration::from_millis(200))
            .with_metrics(metrics.clone());

        prober.probe_once().await;

        assert!(metrics.encode().contains("proxy_provider_healthy{provider=\"a\"} 0"));
        assert!(!is_healthy(store.as_ref(), "a").await);
    }
}
