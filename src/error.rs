//! Error taxonomy for the dispatch engine and its collaborators.
//!
//! Every fallible operation in this crate returns `ProxyError`. The ingress
//! layer (`http`) is the only place that ever turns one of these into a
//! JSON-RPC error object; nothing below it should know about HTTP status
//! codes or wire formats.

use std::time::Duration;
use thiserror::Error;

/// Cap the number of per-provider failures retained in `RetryExhausted` so a
/// pathological pool doesn't grow the error unbounded.
pub const MAX_RETRY_FAILURES: usize = 10;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// A provider's `forward` call failed at the transport level: network
    /// error, non-2xx status, or a response body that didn't parse as JSON.
    #[error("transport error from provider {provider}: {message}")]
    Transport { provider: String, message: String },

    /// The circuit breaker for a provider is open or half-open and saturated.
    #[error("circuit breaker open for provider {provider}")]
    BreakerOpen { provider: String },

    /// No candidate provider could be selected (pool empty, all excluded,
    /// or all overridden/unhealthy).
    #[error("no providers available")]
    NoProvidersAvailable,

    /// The retry loop crossed every reachable provider without success.
    #[error("max retries exceeded: {last_error}")]
    RetryExhausted {
        attempts: usize,
        tried: Vec<String>,
        last_error: String,
    },

    /// The caller's deadline elapsed or the connection was dropped mid-flight.
    #[error("request cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration },

    /// The shared state store (health/latency/cache) failed. Callers treat
    /// this as "unknown"/"miss" rather than propagating it further — this
    /// variant exists so the failure can still be logged at the call site.
    #[error("state store error: {0}")]
    StateStore(String),

    /// Startup configuration was invalid. Fatal; never seen mid-request.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether this error should cause the dispatch loop to retry on another
    /// provider. Application-level JSON-RPC errors never reach this type —
    /// they are returned as `Ok` responses by the provider adapter — so
    /// every variant here is, by construction, retry-eligible except
    /// cancellation and configuration errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::BreakerOpen { .. })
    }
}
