#![forbid(unsafe_code)]

//! A reverse proxy that fronts several upstream JSON-RPC providers — the
//! canonical deployment targets Solana RPC — and distributes requests across
//! them for availability, latency, and cost. Clients see one endpoint; the
//! proxy selects an upstream, retries across providers on failure, caches
//! idempotent results, and exposes health/metrics for operators.
//!
//! The dispatch engine (`dispatch`) composes four collaborators: a
//! health-aware, least-latency `pool`, a per-provider `circuit_breaker`
//! behind the `circuit_breaker_registry`, a background `health` prober, and
//! a content-addressed `cache`. All of them read and write through the
//! `state_store` abstraction so a single instance can run on an in-memory
//! map while a fleet can share a remote store.

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http;
pub mod metrics;
pub mod pool;
pub mod provider;
pub mod rpc;
pub mod sleeper;
pub mod state_store;

pub mod prelude;
