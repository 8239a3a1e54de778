//! Provider adapter: a stateless wrapper around one upstream JSON-RPC
//! endpoint. Every upstream looks the same from here — variants differ
//! only in name, url, and cost.

use std::time::{Duration, Instant};

use serde_json::json;

use crate::error::ProxyError;
use crate::health::HealthSnapshot;
use crate::rpc::{RpcRequest, RpcResponse};

pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_CHECK_METHOD: &str = "getHealth";

#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub url: String,
    pub priority: u32,
    pub cost_per_request: f64,
}

/// Adapter around one upstream. Cheap to clone: the `reqwest::Client` it
/// holds is itself an `Arc`-backed connection pool, shared across every
/// provider and every request — no per-request client allocation.
#[derive(Debug, Clone)]
pub struct Provider {
    pub descriptor: ProviderDescriptor,
    client: reqwest::Client,
    forward_timeout: Duration,
}

impl Provider {
    pub fn new(descriptor: ProviderDescriptor, client: reqwest::Client) -> Self {
        Self { descriptor, client, forward_timeout: DEFAULT_FORWARD_TIMEOUT }
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// POSTs the request to the upstream. Non-2xx HTTP and network/parse
    /// failures are `ProxyError::Transport`. A JSON-RPC response carrying an
    /// `error` field is still `Ok` — application-level errors are not
    /// transport failures.
    pub async fn forward(&self, request: &RpcRequest) -> Result<RpcResponse, ProxyError> {
        let send = self.client.post(&self.descriptor.url).json(request).send();
        let response = tokio::time::timeout(self.forward_timeout, send)
            .await
            .map_err(|_| self.transport_err("request timed out"))?
            .map_err(|e| self.transport_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(self.transport_err(format!("HTTP {status}: {snippet}")));
        }

        response.json::<RpcResponse>().await.map_err(|e| self.transport_err(format!("invalid response body: {e}")))
    }

    /// Invokes `forward` with a liveness method and turns the outcome into a
    /// health snapshot. Transport failure or an `error` field in the reply
    /// both count as unhealthy.
    pub async fn probe(&self) -> HealthSnapshot {
        let request = RpcRequest::new(json!(0), HEALTH_CHECK_METHOD, json!([]));
        let started = Instant::now();
        match self.forward(&request).await {
            Ok(response) if response.is_error() => HealthSnapshot::unhealthy(
                response.error.map(|e| e.message).unwrap_or_else(|| "upstream reported an error".into()),
            ),
            Ok(_) => HealthSnapshot::healthy(started.elapsed()),
            Err(e) => HealthSnapshot::unhealthy(e.to_string()),
        }
    }

    fn transport_err(&self, message: impl Into<String>) -> ProxyError {
        ProxyError::Transport { provider: self.descriptor.name.clone(), message: message.into() }
    }
}
