//! Convenient re-exports for the dispatch engine and its collaborators.
pub use crate::{
    backoff::Backoff,
    cache::{fingerprint, ResponseCache},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    circuit_breaker_registry::CircuitBreakerRegistry,
    clock::{Clock, MonotonicClock},
    config::AppConfig,
    dispatch::{DispatchEngine, Dispatched},
    error::ProxyError,
    health::{HealthProber, HealthSnapshot},
    metrics::Metrics,
    pool::ProviderPool,
    provider::{Provider, ProviderDescriptor},
    rpc::{RpcError, RpcErrorObject, RpcRequest, RpcResponse},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    state_store::{InMemoryStore, StateStore},
};
