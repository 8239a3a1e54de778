//! Provider pool: health-aware, least-latency selection with a discovery
//! phase for unsampled providers.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::provider::Provider;
use crate::state_store::StateStore;

pub const DEFAULT_LATENCY_TTL: Duration = Duration::from_secs(10 * 60);

fn latency_key(provider: &str) -> String {
    format!("latency:{provider}")
}

/// Records the measured end-to-end latency of a successful dispatch.
/// Last-writer-wins; no smoothing.
pub async fn record_latency(store: &dyn StateStore, provider: &str, latency: Duration) {
    let millis = latency.as_millis().to_string();
    if let Err(e) = store.set(&latency_key(provider), millis.into_bytes(), DEFAULT_LATENCY_TTL).await {
        tracing::warn!(provider, error = %e, "failed to record latency sample");
    }
}

async fn latency_sample(store: &dyn StateStore, provider: &str) -> Option<u64> {
    let bytes = store.get(&latency_key(provider)).await.ok().flatten()?;
    std::str::from_utf8(&bytes).ok()?.parse().ok()
}

/// Holds the pool-wide round-robin cursor. Selection never performs I/O
/// while the cursor mutex is held — latency/health lookups happen before
/// it is taken.
pub struct ProviderPool {
    providers: Vec<Provider>,
    cursor: Mutex<usize>,
}

impl ProviderPool {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers, cursor: Mutex::new(0) }
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Selects the next provider to try, excluding `tried` and anything
    /// unhealthy: discovery phase routes unsampled candidates first
    /// (advancing the cursor so no candidate monopolizes traffic);
    /// exploitation phase picks the least-latency candidate, ties broken by
    /// the cursor; fallback to the cursor's next candidate if no latency
    /// data is usable.
    ///
    /// Operator overrides are *not* filtered here: the dispatch engine owns
    /// that check (§4.4's pseudocode selects an overridden provider, adds it
    /// to `tried`, and consumes one iteration of the bounded retry loop —
    /// just without a backoff sleep — so an override still counts against
    /// the retry budget, unlike an unhealthy/already-tried exclusion).
    pub async fn next_excluding(&self, tried: &HashSet<String>, store: &dyn StateStore) -> Option<Provider> {
        let mut candidates: Vec<(Provider, Option<u64>)> = Vec::new();
        for provider in &self.providers {
            let name = provider.name();
            if tried.contains(name) {
                continue;
            }
            if !crate::health::is_healthy(store, name).await {
                continue;
            }
            let latency = latency_sample(store, name).await;
            candidates.push((provider.clone(), latency));
        }

        if candidates.is_empty() {
            return None;
        }

        let unsampled: Vec<usize> =
            candidates.iter().enumerate().filter(|(_, (_, l))| l.is_none()).map(|(i, _)| i).collect();
        if !unsampled.is_empty() {
            let cursor = self.advance(unsampled.len());
            let index = unsampled[cursor % unsampled.len()];
            return Some(candidates[index].0.clone());
        }

        let min_latency = candidates.iter().filter_map(|(_, l)| *l).min()?;
        let cursor = self.advance(candidates.len());
        let tied: Vec<Provider> =
            candidates.into_iter().filter(|(_, l)| *l == Some(min_latency)).map(|(p, _)| p).collect();
        if tied.is_empty() {
            return None;
        }
        Some(tied[cursor % tied.len()].clone())
    }

    /// Advances the round-robin cursor modulo the *candidate* set size, not
    /// the full pool size, returning the pre-advance value for tie-breaking.
    fn advance(&self, candidate_count: usize) -> usize {
        let mut cursor = self.cursor.lock().expect("provider pool cursor poisoned");
        let current = *cursor;
        if candidate_count > 0 {
            *cursor = (current + 1) % candidate_count;
        }
        current
    }
}
