//! Startup configuration: loaded once from YAML (with environment variable
//! expansion), validated, and treated as immutable for the rest of the
//! process. Hot-reload is out of scope; restart the process to pick up
//! changes.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ProxyError;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_read_timeout_ms", with = "duration_millis")]
    pub read_timeout: Duration,
    #[serde(default = "default_write_timeout_ms", with = "duration_millis")]
    pub write_timeout: Duration,
}

fn default_port() -> u16 {
    8080
}
fn default_read_timeout_ms() -> u64 {
    10_000
}
fn default_write_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub cost_per_request: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_ms", with = "duration_millis")]
    pub check_interval: Duration,
    #[serde(default = "default_health_timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: usize,
}

fn default_health_interval_ms() -> u64 {
    5_000
}
fn default_health_timeout_ms() -> u64 {
    5_000
}
fn default_unhealthy_threshold() -> usize {
    1
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(default_health_interval_ms()),
            timeout: Duration::from_millis(default_health_timeout_ms()),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_backoff_ms", with = "duration_millis")]
    pub retry_backoff: Duration,
}

fn default_strategy() -> String {
    "least-latency".to_string()
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_retries: default_max_retries(),
            retry_backoff: Duration::from_millis(default_retry_backoff_ms()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_cb_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_cb_timeout_secs", with = "duration_secs")]
    pub timeout: Duration,
}

fn default_cb_max_requests() -> usize {
    5
}
fn default_cb_timeout_secs() -> u64 {
    60
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_requests: default_cb_max_requests(),
            timeout: Duration::from_secs(default_cb_timeout_secs()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    #[serde(default)]
    pub db: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, with = "method_ttls")]
    pub methods: HashMap<String, Duration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "ServerConfig::default_via_fields")]
    pub server: ServerConfig,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default, rename = "circuit_breaker")]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub caching: CachingConfig,
}

impl ServerConfig {
    fn default_via_fields() -> Self {
        Self {
            port: default_port(),
            read_timeout: Duration::from_millis(default_read_timeout_ms()),
            write_timeout: Duration::from_millis(default_write_timeout_ms()),
        }
    }
}

impl AppConfig {
    /// Loads YAML from `path`, expanding `${VAR}` / `${VAR:-default}`
    /// references against the process environment first.
    pub fn load(path: &str) -> Result<Self, ProxyError> {
        dotenvy::dotenv().ok();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("reading {path}: {e}")))?;
        let expanded = expand_env(&raw);

        let settings = config::Config::builder()
            .add_source(config::File::from_str(&expanded, config::FileFormat::Yaml))
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        let cfg: AppConfig =
            settings.try_deserialize().map_err(|e| ProxyError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ProxyError> {
        if self.providers.is_empty() {
            return Err(ProxyError::Config("at least one provider must be configured".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.providers {
            if p.name.is_empty() {
                return Err(ProxyError::Config("provider name must not be empty".into()));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(ProxyError::Config(format!("duplicate provider name: {}", p.name)));
            }
            if url::Url::parse(&p.url).is_err() {
                return Err(ProxyError::Config(format!("provider {} has an unparseable url: {}", p.name, p.url)));
            }
        }
        Ok(())
    }
}

/// Replaces `${VAR}` and `${VAR:-default}` references with values from the
/// process environment. Unset variables with no default expand to empty.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = input[i + 2..].find('}') {
                let inner = &input[i + 2..i + 2 + end];
                let (name, default) = match inner.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                let value = std::env::var(name).ok().or_else(|| default.map(str::to_string)).unwrap_or_default();
                out.push_str(&value);
                i += 2 + end + 1;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(de: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(de)?))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(de: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(de)?))
    }
}

mod method_ttls {
    use serde::{Deserialize, Deserializer};
    use std::collections::HashMap;
    use std::time::Duration;

    pub fn deserialize<'de, D>(de: D) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: HashMap<String, u64> = HashMap::deserialize(de)?;
        Ok(raw.into_iter().map(|(k, v)| (k, Duration::from_millis(v))).collect())
    }
}
