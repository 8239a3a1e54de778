//! Ingress HTTP API: the JSON-RPC forwarding endpoint plus the
//! operator/observability surface (health, status, chaos drills, metrics).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::error_handling::HandleErrorLayer;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;

use crate::config::ServerConfig;
use crate::dispatch::DispatchEngine;
use crate::metrics::Metrics;
use crate::pool::ProviderPool;
use crate::rpc::{RpcRequest, RpcResponse, INTERNAL_ERROR, PARSE_ERROR};

const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchEngine,
    pub pool: Arc<ProviderPool>,
    pub breakers: Arc<crate::circuit_breaker_registry::CircuitBreakerRegistry>,
    pub store: Arc<dyn crate::state_store::StateStore>,
    pub metrics: Arc<Metrics>,
}

/// Builds the router, bounding every request by `server.read_timeout +
/// server.write_timeout` via `tower::timeout::TimeoutLayer` — axum/hyper
/// don't expose separate read-phase and write-phase deadlines once a
/// handler is invoked, so the two config fields are summed into one
/// end-to-end budget for the request/response round trip.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let request_timeout = server.read_timeout + server.write_timeout;
    Router::new()
        .route("/", post(rpc_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/chaos/trip", post(chaos_trip_handler))
        .route("/api/v1/chaos/reset", post(chaos_reset_handler))
        .route("/api/v1/test-rpc", post(test_rpc_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn handle_timeout_error(err: BoxError) -> (StatusCode, Json<Value>) {
    if err.is::<tower::timeout::error::Elapsed>() {
        let response = RpcResponse::error(Value::Null, INTERNAL_ERROR, "request exceeded server read/write timeout");
        (StatusCode::REQUEST_TIMEOUT, Json(json!(response)))
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": err.to_string()})))
    }
}

async fn rpc_handler(State(state): State<AppState>, body: axum::body::Bytes) -> impl IntoResponse {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => {
            let response = RpcResponse::error(Value::Null, PARSE_ERROR, "invalid JSON");
            return (StatusCode::BAD_REQUEST, Json(response));
        }
    };

    if let Err(rpc_err) = request.validate() {
        return (StatusCode::BAD_REQUEST, Json(rpc_err.into_response()));
    }

    let method = request.method.clone();
    let started = std::time::Instant::now();
    match state.dispatch.dispatch(&request, DEFAULT_REQUEST_DEADLINE).await {
        Ok(outcome) => {
            let status_label = if outcome.response.is_error() { "rpc_error" } else { "ok" };
            if !outcome.cached {
                let cost = state
                    .pool
                    .providers()
                    .iter()
                    .find(|p| p.name() == outcome.provider)
                    .map(|p| p.descriptor.cost_per_request)
                    .unwrap_or(0.0);
                state.metrics.record_request(&outcome.provider, &method, status_label, started.elapsed().as_secs_f64(), cost);
            }
            (StatusCode::OK, Json(outcome.response))
        }
        Err(err) => {
            tracing::error!(method = %method, error = %err, "dispatch exhausted");
            let response = RpcResponse::error(request.id, INTERNAL_ERROR, err.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response))
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    Json(json!({
        "status": "healthy",
        "providers": state.pool.providers().len(),
        "timestamp": timestamp,
    }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut entries = Vec::new();
    for provider in state.pool.providers() {
        let name = provider.name();
        let healthy = crate::health::is_healthy(state.store.as_ref(), name).await;
        let breaker_state = state.breakers.get(name).current_state().as_str();
        entries.push(json!({
            "name": name,
            "healthy": healthy,
            "latency_ms": latency_sample_for(&state, name).await,
            "breaker_state": breaker_state,
            "cost_per_req": provider.descriptor.cost_per_request,
            "priority": provider.descriptor.priority,
        }));
    }
    Json(entries)
}

async fn latency_sample_for(state: &AppState, provider: &str) -> Option<u64> {
    let bytes = state.store.get(&format!("latency:{provider}")).await.ok().flatten()?;
    std::str::from_utf8(&bytes).ok()?.parse().ok()
}

#[derive(Deserialize)]
struct ChaosTripParams {
    provider: String,
}

async fn chaos_trip_handler(
    State(state): State<AppState>,
    Query(params): Query<ChaosTripParams>,
) -> impl IntoResponse {
    state.breakers.set_override(&params.provider);
    Json(json!({"provider": params.provider, "override": "open"}))
}

async fn chaos_reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.breakers.clear_overrides();
    Json(json!({"overrides": "cleared"}))
}

async fn test_rpc_handler(State(state): State<AppState>) -> impl IntoResponse {
    let request = RpcRequest::new(json!(1), "getSlot", json!([]));
    match state.dispatch.dispatch(&request, DEFAULT_REQUEST_DEADLINE).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({"provider": outcome.provider, "response": outcome.response})),
        ),
        Err(err) => {
            let response = RpcResponse::error(json!(1), INTERNAL_ERROR, err.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"provider": "", "response": response})))
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], state.metrics.encode())
}
