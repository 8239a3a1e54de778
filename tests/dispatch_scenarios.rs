//! End-to-end dispatch scenarios against mocked upstreams, one test per
//! literal scenario from the design doc's testable-properties section.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use solana_rpc_proxy::prelude::*;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn descriptor(name: &str, url: &str) -> ProviderDescriptor {
    ProviderDescriptor { name: name.into(), url: url.into(), priority: 0, cost_per_request: 0.0 }
}

fn engine(providers: Vec<Provider>, store: Arc<InMemoryStore>) -> (DispatchEngine, Arc<ProviderPool>, Arc<CircuitBreakerRegistry>) {
    let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
    let pool = Arc::new(ProviderPool::new(providers));
    let breakers = Arc::new(CircuitBreakerRegistry::new(names, CircuitBreakerConfig::default()));
    let cache = Arc::new(ResponseCache::new(false, HashMap::new()));
    let dispatch = DispatchEngine::new(pool.clone(), breakers.clone(), cache, store, Arc::new(InstantSleeper));
    (dispatch, pool, breakers)
}

async fn ok_server(result: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": result
        })))
        .mount(&server)
        .await;
    server
}

async fn failing_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(status)).mount(&server).await;
    server
}

#[tokio::test]
async fn s1_round_robin_discovery_hits_every_provider_once() {
    let a = ok_server(json!("ok")).await;
    let b = ok_server(json!("ok")).await;
    let c = ok_server(json!("ok")).await;
    let client = reqwest::Client::new();
    let providers = vec![
        Provider::new(descriptor("a", &a.uri()), client.clone()),
        Provider::new(descriptor("b", &b.uri()), client.clone()),
        Provider::new(descriptor("c", &c.uri()), client),
    ];
    let store = Arc::new(InMemoryStore::new());
    let (dispatch, _, _) = engine(providers, store);

    let mut winners = HashSet::new();
    for i in 0..3 {
        let request = RpcRequest::new(json!(i), "getSlot", json!([]));
        let outcome = dispatch.dispatch(&request, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.response.result, Some(json!("ok")));
        winners.insert(outcome.provider);
    }
    assert_eq!(winners, HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()]));
}

#[tokio::test]
async fn s2_least_latency_selects_the_fastest_sampled_provider() {
    let a = ok_server(json!("a")).await;
    let b = ok_server(json!("b")).await;
    let c = ok_server(json!("c")).await;
    let client = reqwest::Client::new();
    let providers = vec![
        Provider::new(descriptor("a", &a.uri()), client.clone()),
        Provider::new(descriptor("b", &b.uri()), client.clone()),
        Provider::new(descriptor("c", &c.uri()), client),
    ];
    let store = Arc::new(InMemoryStore::new());
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "a", Duration::from_millis(150)).await;
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "b", Duration::from_millis(50)).await;
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "c", Duration::from_millis(200)).await;
    let (dispatch, _, _) = engine(providers, store);

    let request = RpcRequest::new(json!(7), "getSlot", json!([]));
    let outcome = dispatch.dispatch(&request, Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome.provider, "b");
    assert_eq!(outcome.response.id, json!(7));
}

#[tokio::test]
async fn s3_failover_retries_on_the_second_provider() {
    let a = failing_server(500).await;
    let b = ok_server(json!(42)).await;
    let client = reqwest::Client::new();
    let providers = vec![
        Provider::new(descriptor("a", &a.uri()), client.clone()),
        Provider::new(descriptor("b", &b.uri()), client),
    ];
    let store = Arc::new(InMemoryStore::new());
    // Prime latency so selection is deterministic: a first, then b.
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "a", Duration::from_millis(10)).await;
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "b", Duration::from_millis(20)).await;
    let (dispatch, _, breakers) = engine(providers, store);

    let request = RpcRequest::new(json!(1), "getSlot", json!([]));
    let outcome = dispatch.dispatch(&request, Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome.provider, "b");
    assert_eq!(outcome.response.result, Some(json!(42)));
    assert_eq!(breakers.get("a").state_handle().failure_count(), 1);
}

#[tokio::test]
async fn s4_breaker_open_skips_the_tripped_provider() {
    let a = failing_server(500).await;
    let b = ok_server(json!(1)).await;
    let client = reqwest::Client::new();
    let providers = vec![
        Provider::new(descriptor("a", &a.uri()), client.clone()),
        Provider::new(descriptor("b", &b.uri()), client),
    ];
    let store = Arc::new(InMemoryStore::new());
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "a", Duration::from_millis(10)).await;
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "b", Duration::from_millis(10)).await;
    let (dispatch, _, breakers) = engine(providers, store);

    // Trip the breaker on "a" directly, as if five consecutive failures had
    // already happened.
    for _ in 0..5 {
        let _ = breakers
            .get("a")
            .execute(|| async { Err::<(), _>(solana_rpc_proxy::error::ProxyError::Transport {
                provider: "a".into(),
                message: "boom".into(),
            }) })
            .await;
    }
    assert_eq!(breakers.get("a").current_state(), CircuitState::Open);

    let request = RpcRequest::new(json!(1), "getSlot", json!([]));
    let outcome = dispatch.dispatch(&request, Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome.provider, "b");
}

#[tokio::test]
async fn s5_operator_override_skips_provider_until_cleared() {
    let a = ok_server(json!("a")).await;
    let b = ok_server(json!("b")).await;
    let client = reqwest::Client::new();
    let providers = vec![
        Provider::new(descriptor("a", &a.uri()), client.clone()),
        Provider::new(descriptor("b", &b.uri()), client),
    ];
    let store = Arc::new(InMemoryStore::new());
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "a", Duration::from_millis(10)).await;
    solana_rpc_proxy::pool::record_latency(store.as_ref(), "b", Duration::from_millis(10)).await;
    let (dispatch, _, breakers) = engine(providers, store);

    breakers.set_override("a");
    let request = RpcRequest::new(json!(1), "getSlot", json!([]));
    let outcome = dispatch.dispatch(&request, Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome.provider, "b");

    breakers.clear_overrides();
    assert!(!breakers.is_overridden("a"));
}

#[tokio::test]
async fn s6_cache_hit_avoids_contacting_any_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": 100})))
        .expect(1)
        .mount(&server)
        .await;
    let client = reqwest::Client::new();
    let providers = vec![Provider::new(descriptor("a", &server.uri()), client)];
    let store = Arc::new(InMemoryStore::new());

    let pool = Arc::new(ProviderPool::new(providers));
    let breakers = Arc::new(CircuitBreakerRegistry::new(vec!["a".to_string()], CircuitBreakerConfig::default()));
    let mut ttls = HashMap::new();
    ttls.insert("getSlot".to_string(), Duration::from_secs(2));
    let cache = Arc::new(ResponseCache::new(true, ttls));
    let dispatch = DispatchEngine::new(pool, breakers, cache, store, Arc::new(InstantSleeper));

    let request = RpcRequest::new(json!(1), "getSlot", json!([]));
    let first = dispatch.dispatch(&request, Duration::from_secs(5)).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.response.result, Some(json!(100)));

    let second = dispatch.dispatch(&request, Duration::from_secs(5)).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.response.result, Some(json!(100)));

    server.verify().await;
}
