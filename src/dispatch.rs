//! Dispatch engine: cache lookup, pool selection, breaker-gated forwarding,
//! cross-provider retry with exponential backoff, and latency feedback.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backoff::Backoff;
use crate::cache::ResponseCache;
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::error::ProxyError;
use crate::pool::ProviderPool;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::sleeper::Sleeper;
use crate::state_store::StateStore;

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Everything the dispatch engine needs to serve one request. Cheap to
/// clone: every field is `Arc`-backed or itself a cheap handle.
#[derive(Clone)]
pub struct DispatchEngine {
    pool: Arc<ProviderPool>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<ResponseCache>,
    store: Arc<dyn StateStore>,
    sleeper: Arc<dyn Sleeper>,
    backoff: Backoff,
    max_retries: usize,
}

/// Outcome of a successful dispatch: the response plus which provider
/// produced it.
pub struct Dispatched {
    pub response: RpcResponse,
    pub provider: String,
    pub cached: bool,
}

impl DispatchEngine {
    pub fn new(
        pool: Arc<ProviderPool>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<ResponseCache>,
        store: Arc<dyn StateStore>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            pool,
            breakers,
            cache,
            store,
            sleeper,
            backoff: Backoff::exponential(DEFAULT_BACKOFF_BASE),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Serves one request end to end. `deadline` is the caller's
    /// cancellation signal: backoff sleeps race against it and return
    /// `ProxyError::Cancelled` promptly on expiry.
    pub async fn dispatch(&self, request: &RpcRequest, deadline: Duration) -> Result<Dispatched, ProxyError> {
        let started = Instant::now();

        if let Some(response) = self.cache.lookup(self.store.as_ref(), request).await {
            return Ok(Dispatched { response, provider: String::new(), cached: true });
        }

        let mut tried = HashSet::new();
        let mut last_error: Option<ProxyError> = None;

        for attempt in 0..self.max_retries {
            let elapsed = started.elapsed();
            let remaining = deadline.checked_sub(elapsed).ok_or(ProxyError::Cancelled { elapsed })?;

            let provider = match self.pool.next_excluding(&tried, self.store.as_ref()).await {
                Some(p) => p,
                None if tried.is_empty() => return Err(ProxyError::NoProvidersAvailable),
                None => break,
            };
            tried.insert(provider.name().to_string());

            if self.breakers.is_overridden(provider.name()) {
                // Skipped without consuming a retry's backoff.
                continue;
            }

            let breaker = self.breakers.get(provider.name());
            let attempt_started = Instant::now();
            let outcome = tokio::time::timeout(remaining, breaker.execute(|| async { provider.forward(request).await }))
                .await
                .map_err(|_| ProxyError::Cancelled { elapsed: started.elapsed() })?;

            match outcome {
                Ok(response) => {
                    crate::pool::record_latency(self.store.as_ref(), provider.name(), attempt_started.elapsed())
                        .await;
                    self.cache.store(self.store.as_ref(), request, &response).await;
                    return Ok(Dispatched { response, provider: provider.name().to_string(), cached: false });
                }
                Err(err) => {
                    tracing::warn!(provider = provider.name(), attempt, error = %err, "dispatch attempt failed");
                    last_error = Some(err);
                }
            }

            if attempt + 1 < self.max_retries {
                let delay = self.backoff.delay(attempt + 1);
                let elapsed = started.elapsed();
                let remaining = deadline.checked_sub(elapsed).ok_or(ProxyError::Cancelled { elapsed })?;
                tokio::select! {
                    _ = self.sleeper.sleep(delay) => {}
                    _ = tokio::time::sleep(remaining) => {
                        return Err(ProxyError::Cancelled { elapsed: started.elapsed() });
                    }
                }
            }
        }

        let last_error = last_error.unwrap_or(ProxyError::NoProvidersAvailable);
        Err(ProxyError::RetryExhausted {
            attempts: tried.len(),
            tried: tried.into_iter().collect(),
            last_error: last_error.to_string(),
        })
    }
}
