//! Content-addressed response cache keyed by (method, params) fingerprint.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::rpc::{RpcRequest, RpcResponse};
use crate::state_store::StateStore;

/// method + first 8 bytes of SHA-256(canonicalized params), hex-encoded.
pub fn fingerprint(request: &RpcRequest) -> String {
    let canonical = request.canonical_params();
    let serialized = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&serialized);
    format!("{}:{}", request.method, hex::encode(&digest[..8]))
}

fn cache_key(request: &RpcRequest) -> String {
    format!("rpc:cache:{}", fingerprint(request))
}

pub struct ResponseCache {
    enabled: bool,
    method_ttls: HashMap<String, Duration>,
}

impl ResponseCache {
    pub fn new(enabled: bool, method_ttls: HashMap<String, Duration>) -> Self {
        Self { enabled, method_ttls }
    }

    fn ttl_for(&self, method: &str) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        self.method_ttls.get(method).copied()
    }

    /// Returns the cached response, or `None` on a miss. Disabled caching,
    /// an uncacheable method, and store errors all collapse to a miss.
    pub async fn lookup(&self, store: &dyn StateStore, request: &RpcRequest) -> Option<RpcResponse> {
        self.ttl_for(&request.method)?;
        let bytes = store.get(&cache_key(request)).await.ok().flatten()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Stores `response` under the request's fingerprint if the method is
    /// cacheable and the response carries a result, not an error. Store
    /// errors are logged and swallowed.
    pub async fn store(&self, store: &dyn StateStore, request: &RpcRequest, response: &RpcResponse) {
        let Some(ttl) = self.ttl_for(&request.method) else { return };
        if response.is_error() {
            return;
        }
        let Ok(encoded) = serde_json::to_vec(response) else { return };
        if let Err(e) = store.set(&cache_key(request), encoded, ttl).await {
            tracing::warn!(method = %request.method, error = %e, "failed to write cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::InMemoryStore;
    use serde_json::json;

    fn cacheable_cache() -> ResponseCache {
        let mut ttls = HashMap::new();
        ttls.insert("getSlot".to_string(), Duration::from_secs(2));
        ResponseCache::new(true, ttls)
    }

    #[tokio::test]
    async fn store_then_lookup_round_trips_within_ttl() {
        let cache = cacheable_cache();
        let store = InMemoryStore::new();
        let request = RpcRequest::new(json!(1), "getSlot", json!([]));
        let response = RpcResponse::success(json!(1), json!(100));

        assert!(cache.lookup(&store, &request).await.is_none());
        cache.store(&store, &request, &response).await;
        let hit = cache.lookup(&store, &request).await.unwrap();
        assert_eq!(hit.result, Some(json!(100)));
    }

    #[tokio::test]
    async fn uncacheable_method_is_always_a_miss() {
        let cache = cacheable_cache();
        let store = InMemoryStore::new();
        let request = RpcRequest::new(json!(1), "sendTransaction", json!([]));
        let response = RpcResponse::success(json!(1), json!("sig"));
        cache.store(&store, &request, &response).await;
        assert!(cache.lookup(&store, &request).await.is_none());
    }

    #[tokio::test]
    async fn error_responses_are_not_cached() {
        let cache = cacheable_cache();
        let store = InMemoryStore::new();
        let request = RpcRequest::new(json!(1), "getSlot", json!([]));
        let response = RpcResponse::error(json!(1), -1, "boom");
        cache.store(&store, &request, &response).await;
        assert!(cache.lookup(&store, &request).await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_is_always_a_miss() {
        let mut ttls = HashMap::new();
        ttls.insert("getSlot".to_string(), Duration::from_secs(2));
        let cache = ResponseCache::new(false, ttls);
        let store = InMemoryStore::new();
        let request = RpcRequest::new(json!(1), "getSlot", json!([]));
        let response = RpcResponse::success(json!(1), json!(100));
        cache.store(&store, &request, &response).await;
        assert!(cache.lookup(&store, &request).await.is_none());
    }

    #[tokio::test]
    async fn fingerprint_is_stable_across_param_field_order() {
        let a = RpcRequest::new(json!(1), "getSlot", json!({"b": 1, "a": 2}));
        let b = RpcRequest::new(json!(2), "getSlot", json!({"a": 2, "b": 1}));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
