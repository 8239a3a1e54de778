//! Registry of per-provider circuit breakers, plus the operator override map.
//!
//! Breakers are created once at startup, one per configured provider. The
//! override map is a second, independent piece of state: forcing a provider
//! "open" skips it during selection regardless of what its breaker thinks,
//! and is surfaced alongside breaker state on the status endpoint.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: HashMap<String, CircuitBreaker>,
    overrides: Mutex<HashSet<String>>,
}

impl CircuitBreakerRegistry {
    pub fn new<I>(provider_names: I, config: CircuitBreakerConfig) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let breakers = provider_names
            .into_iter()
            .map(|name| {
                let breaker = CircuitBreaker::new(name.clone(), config.clone());
                (name, breaker)
            })
            .collect();
        Self { breakers, overrides: Mutex::new(HashSet::new()) }
    }

    /// Breaker handle for a provider. Panics if the name wasn't registered at
    /// construction time — the pool is immutable after startup, so this
    /// indicates a programming error, not a runtime condition to recover from.
    pub fn get(&self, provider: &str) -> &CircuitBreaker {
        self.breakers
            .get(provider)
            .unwrap_or_else(|| panic!("no circuit breaker registered for provider {provider}"))
    }

    /// Force a provider's selection to be skipped regardless of breaker state.
    pub fn set_override(&self, provider: &str) {
        self.overrides.lock().expect("override map poisoned").insert(provider.to_string());
        tracing::warn!(provider, "operator override set: forced open");
    }

    /// Clear every operator override.
    pub fn clear_overrides(&self) {
        self.overrides.lock().expect("override map poisoned").clear();
        tracing::info!("operator overrides cleared");
    }

    pub fn is_overridden(&self, provider: &str) -> bool {
        self.overrides.lock().expect("override map poisoned").contains(provider)
    }

    /// Snapshot of (provider, breaker state, overridden?) sorted by name, for
    /// the `/api/v1/status` endpoint.
    pub fn snapshot(&self) -> Vec<(String, CircuitState, bool)> {
        let overrides = self.overrides.lock().expect("override map poisoned");
        let mut entries: Vec<_> = self
            .breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.current_state(), overrides.contains(name)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
