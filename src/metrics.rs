//! Prometheus metrics exposed on `GET /metrics`.
//!
//! Folded directly into the dispatch path rather than kept as a standalone
//! telemetry sink: a request counter by `{provider, method, status}`, a
//! duration histogram by `{provider}`, a health gauge by `{provider}`, and a
//! cumulative cost counter by `{provider}`.

use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    provider_healthy: IntGaugeVec,
    provider_cost_total: prometheus::CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("proxy_requests_total", "JSON-RPC requests dispatched, by provider/method/status"),
            &["provider", "method", "status"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "proxy_request_duration_seconds",
                "End-to-end dispatch latency per provider",
            ),
            &["provider"],
        )?;
        let provider_healthy = IntGaugeVec::new(
            Opts::new("proxy_provider_healthy", "1 if the provider's last health snapshot was healthy"),
            &["provider"],
        )?;
        let provider_cost_total = prometheus::CounterVec::new(
            Opts::new("proxy_provider_cost_total", "Cumulative estimated cost per provider"),
            &["provider"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(provider_healthy.clone()))?;
        registry.register(Box::new(provider_cost_total.clone()))?;

        Ok(Self { registry, requests_total, request_duration_seconds, provider_healthy, provider_cost_total })
    }

    pub fn record_request(&self, provider: &str, method: &str, status: &str, duration_secs: f64, cost: f64) {
        self.requests_total.with_label_values(&[provider, method, status]).inc();
        self.request_duration_seconds.with_label_values(&[provider]).observe(duration_secs);
        if cost > 0.0 {
            self.provider_cost_total.with_label_values(&[provider]).inc_by(cost);
        }
    }

    pub fn set_provider_health(&self, provider: &str, healthy: bool) {
        self.provider_healthy.with_label_values(&[provider]).set(if healthy { 1 } else { 0 });
    }

    /// Renders every registered metric family as Prometheus text format.
    pub fn encode(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer).expect("prometheus text encoding never fails");
        String::from_utf8(buffer).expect("prometheus text encoder always emits valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric registration with fixed, non-conflicting names cannot fail")
    }
}
