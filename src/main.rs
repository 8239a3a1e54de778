//! Process entrypoint: load config, wire up the dispatch engine, run the
//! health prober, and serve the ingress HTTP API with graceful shutdown.
//! Exits 0 on clean shutdown via SIGINT/SIGTERM, non-zero on unrecoverable
//! startup error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use solana_rpc_proxy::backoff::Backoff;
use solana_rpc_proxy::cache::ResponseCache;
use solana_rpc_proxy::circuit_breaker::CircuitBreakerConfig;
use solana_rpc_proxy::circuit_breaker_registry::CircuitBreakerRegistry;
use solana_rpc_proxy::config::AppConfig;
use solana_rpc_proxy::dispatch::DispatchEngine;
use solana_rpc_proxy::health::HealthProber;
use solana_rpc_proxy::http::{self, AppState};
use solana_rpc_proxy::metrics::Metrics;
use solana_rpc_proxy::pool::ProviderPool;
use solana_rpc_proxy::provider::{Provider, ProviderDescriptor};
use solana_rpc_proxy::sleeper::TokioSleeper;
use solana_rpc_proxy::state_store::{InMemoryStore, StateStore};

const CONFIG_PATH_ENV: &str = "PROXY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    init_tracing();

    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match AppConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::builder().build()?;

    let providers: Vec<Provider> = config
        .providers
        .iter()
        .map(|p| {
            Provider::new(
                ProviderDescriptor {
                    name: p.name.clone(),
                    url: p.url.clone(),
                    priority: p.priority,
                    cost_per_request: p.cost_per_request,
                },
                client.clone(),
            )
        })
        .collect();
    let provider_names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();

    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    // The `circuit_breaker:` config section (spec.md §6) only carries
    // `max_requests`/`timeout`; the trip threshold has no config knob and
    // keeps the spec's documented default of 5 (§4.3). `health.unhealthy_threshold`
    // is a distinct field for the health prober's own verdict, not a proxy
    // for this one.
    let breaker_config = CircuitBreakerConfig {
        recovery_timeout: config.circuit_breaker.timeout,
        half_open_max_calls: config.circuit_breaker.max_requests,
        ..CircuitBreakerConfig::default()
    };
    let breakers = Arc::new(CircuitBreakerRegistry::new(provider_names, breaker_config));
    let pool = Arc::new(ProviderPool::new(providers.clone()));
    let cache = Arc::new(ResponseCache::new(config.caching.enabled, method_ttls(&config)));
    let metrics = Arc::new(Metrics::new()?);

    let dispatch = DispatchEngine::new(pool.clone(), breakers.clone(), cache, store.clone(), Arc::new(TokioSleeper))
        .with_max_retries(config.routing.max_retries)
        .with_backoff(Backoff::exponential(config.routing.retry_backoff));

    let cancel = CancellationToken::new();
    let prober = HealthProber::new(providers, store.clone())
        .with_interval(config.health.check_interval)
        .with_probe_deadline(config.health.timeout)
        .with_metrics(metrics.clone());
    let prober_handle = prober.spawn(cancel.clone());

    let server_config = config.server.clone();
    let state = AppState { dispatch, pool, breakers, store, metrics };
    let app = http::router(state, &server_config);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    tracing::info!(port = config.server.port, "listening");

    // Drain begins only once `shutdown_signal` resolves; the `SHUTDOWN_DRAIN`
    // deadline then bounds the in-flight-connection wait itself, since
    // `axum::serve`'s graceful shutdown has no built-in timeout and would
    // otherwise wait indefinitely (spec.md §6: "graceful drain ≤ 5 s").
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let serve_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = drain_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = drain_tx.send(());

    match tokio::time::timeout(SHUTDOWN_DRAIN, serve_task).await {
        Ok(Ok(Ok(()))) => tracing::info!("server drained cleanly"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "server exited with error"),
        Ok(Err(e)) => tracing::error!(error = %e, "server task panicked during shutdown"),
        Err(_) => tracing::warn!(deadline = ?SHUTDOWN_DRAIN, "graceful drain deadline exceeded, forcing exit"),
    }

    cancel.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_DRAIN, prober_handle).await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn method_ttls(config: &AppConfig) -> HashMap<String, Duration> {
    config.caching.methods.clone()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining");
}
