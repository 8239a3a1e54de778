//! Shared state store: the TTL-keyed get/set/ping abstraction behind health
//! snapshots, latency samples, and cache entries.
//!
//! An async trait with an in-memory default and room for a remote backend.
//! Byte-oriented and TTL'd rather than numeric and CAS'd, since health,
//! latency, and cache entries are write-and-expire, not compare-and-swap
//! counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::ProxyError;

#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProxyError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ProxyError>;
    async fn ping(&self) -> Result<(), ProxyError>;
}

/// Process-local TTL-aware map with a background sweep, for single-instance
/// deployments.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    data: Arc<Mutex<HashMap<String, (Vec<u8>, Instant)>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Spawns the background sweep task. Returned handle may be dropped to
    /// detach it; the task itself runs until the process exits.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let data = self.data.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                data.lock().expect("InMemoryStore sweep: mutex poisoned").retain(|_, (_, expires)| *expires > now);
            }
        })
    }

    fn len(&self) -> usize {
        self.data.lock().expect("InMemoryStore.len: mutex poisoned").len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProxyError> {
        let guard = self.data.lock().expect("InMemoryStore.get: mutex poisoned");
        match guard.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ProxyError> {
        let mut guard = self.data.lock().expect("InMemoryStore.set: mutex poisoned");
        guard.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn ping(&self) -> Result<(), ProxyError> {
        Ok(())
    }
}

/// Remote store backed by the real `redis` crate's async connection manager,
/// for horizontally-scaled fleets. Gated behind the `redis-store` feature so
/// the default build has no network dependency.
#[cfg(feature = "redis-store")]
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

#[cfg(feature = "redis-store")]
impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, ProxyError> {
        let client = redis::Client::open(url).map_err(|e| ProxyError::StateStore(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| ProxyError::StateStore(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[cfg(feature = "redis-store")]
impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[cfg(feature = "redis-store")]
#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProxyError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| ProxyError::StateStore(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ProxyError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| ProxyError::StateStore(e.to_string()))
    }

    async fn ping(&self) -> Result<(), ProxyError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| ProxyError::StateStore(e.to_string()))
    }
}
