use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AdapterError, AdapterResult};

/// Adapter process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which adapter this process serves and how it is reached
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Mutual TLS material
    #[serde(default)]
    pub tls: TlsConfig,

    /// Document store (chat history)
    #[serde(default)]
    pub mongo: MongoConfig,

    /// Key-value store (users and sessions)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Columnar store (telemetry)
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,

    /// Batching write-cache in front of the columnar store
    #[serde(default)]
    pub cache: CacheConfig,

    /// Backend call timeouts
    #[serde(default)]
    pub backend: BackendConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Local log file and remote log shipping
    #[serde(default)]
    pub logs: LogsConfig,
}

/// The three capability adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Chat,
    Users,
    Telemetry,
}

impl AdapterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdapterKind::Chat => "chat",
            AdapterKind::Users => "users",
            AdapterKind::Telemetry => "telemetry",
        }
    }
}

impl FromStr for AdapterKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "mongo" | "mongodb" => Ok(AdapterKind::Chat),
            "users" | "redis" => Ok(AdapterKind::Users),
            "telemetry" | "clickhouse" => Ok(AdapterKind::Telemetry),
            other => Err(AdapterError::ConfigurationError(format!(
                "unknown adapter kind '{other}'"
            ))),
        }
    }
}

/// Where an adapter keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The production store for the adapter kind (MongoDB, Redis or ClickHouse)
    #[serde(alias = "mongo", alias = "redis", alias = "clickhouse")]
    Native,
    /// Process-local store for development and tests
    Memory,
}

impl FromStr for BackendKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "mongo" | "redis" | "clickhouse" => Ok(BackendKind::Native),
            "memory" => Ok(BackendKind::Memory),
            other => Err(AdapterError::ConfigurationError(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_kind")]
    pub kind: AdapterKind,

    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// gRPC listen address (default: 0.0.0.0:8082)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Shared bearer token expected in the `authorization` metadata
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Disable only for local development
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// CA that signed the peer certificates
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,

    /// This side's certificate
    #[serde(default = "default_cert")]
    pub cert: PathBuf,

    /// This side's private key
    #[serde(default = "default_key")]
    pub key: PathBuf,

    /// Server name the client expects in the server certificate
    #[serde(default = "default_domain")]
    pub domain_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    #[serde(default = "default_mongo_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Idle connections kept for reuse (default: 5)
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Connections idle longer than this are pinged before reuse (default: 60s)
    #[serde(default = "default_idle_check")]
    pub idle_check_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl RedisConfig {
    pub fn idle_check(&self) -> Duration {
        Duration::from_secs(self.idle_check_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Buffered telemetry items before a flush (default: 20)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Connect and ping timeout in seconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Read/write/commit timeout in seconds (default: 30s)
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Metrics server port (default: 2114)
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Directory for the `<kind>-adapter.log` JSON file; unset keeps logs on the console only
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Forward log lines to a telemetry adapter
    #[serde(default)]
    pub ship: Option<LogShipConfig>,
}

/// Remote telemetry adapter that receives this process's log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogShipConfig {
    /// e.g. `https://telemetry-adapter:8082`
    pub url: String,

    #[serde(default = "default_log_db")]
    pub db: String,

    #[serde(default = "default_log_table")]
    pub table: String,

    /// Lines held while the adapter is slow; further lines are dropped (default: 1024)
    #[serde(default = "default_log_buffer")]
    pub buffer: usize,
}

impl LogShipConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db: default_log_db(),
            table: default_log_table(),
            buffer: default_log_buffer(),
        }
    }
}

// Default value functions
fn default_kind() -> AdapterKind {
    AdapterKind::Chat
}
fn default_backend() -> BackendKind {
    BackendKind::Native
}
fn default_listen_addr() -> String {
    "0.0.0.0:8082".to_string()
}
fn default_ca_cert() -> PathBuf {
    PathBuf::from("certs/ca-cert.pem")
}
fn default_cert() -> PathBuf {
    PathBuf::from("certs/server-cert.pem")
}
fn default_key() -> PathBuf {
    PathBuf::from("certs/server-key.pem")
}
fn default_domain() -> String {
    "localhost".to_string()
}
fn default_mongo_url() -> String {
    "mongodb://127.0.0.1:27017".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}
fn default_max_idle() -> usize {
    5
}
fn default_idle_check() -> u64 {
    60
}
fn default_clickhouse_url() -> String {
    "http://127.0.0.1:8123".to_string()
}
fn default_cache_capacity() -> usize {
    20
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_operation_timeout() -> u64 {
    30
}
fn default_metrics_port() -> u16 {
    2114
}
fn default_true() -> bool {
    true
}
fn default_log_db() -> String {
    "logs".to_string()
}
fn default_log_table() -> String {
    "adapter_logs".to_string()
}
fn default_log_buffer() -> usize {
    1024
}

const REDACTED: &str = "[REDACTED]";

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("kind", &self.kind)
            .field("backend", &self.backend)
            .field("listen_addr", &self.listen_addr)
            .field("token", &REDACTED)
            .finish()
    }
}

impl fmt::Debug for ClickHouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickHouseConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .finish()
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            backend: default_backend(),
            listen_addr: default_listen_addr(),
            token: String::new(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_cert: default_ca_cert(),
            cert: default_cert(),
            key: default_key(),
            domain_name: default_domain(),
        }
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: default_mongo_url(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            max_idle: default_max_idle(),
            idle_check_secs: default_idle_check(),
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            user: None,
            password: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
            enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from file or environment
    pub fn load() -> AdapterResult<Self> {
        if let Ok(config_path) = env::var("ADAPTER_CONFIG_PATH") {
            Self::from_file(&config_path)
        } else if Path::new("/app/config/adapters.yaml").exists() {
            Self::from_file("/app/config/adapters.yaml")
        } else if Path::new("config/adapters.yaml").exists() {
            Self::from_file("config/adapters.yaml")
        } else {
            Self::from_env(Self::default()).validated()
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> AdapterResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AdapterError::ConfigurationError(format!("Failed to read config file {path}: {e}"))
        })?;

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            AdapterError::ConfigurationError(format!("Failed to parse config: {e}"))
        })?;

        Self::from_env(config).validated()
    }

    /// Override configuration with environment variables
    pub fn from_env(mut config: Config) -> Self {
        if let Ok(v) = env::var("ADAPTER_KIND") {
            match v.parse() {
                Ok(kind) => config.adapter.kind = kind,
                Err(e) => tracing::warn!("Ignoring ADAPTER_KIND: {}", e),
            }
        }
        if let Ok(v) = env::var("ADAPTER_BACKEND") {
            match v.parse() {
                Ok(backend) => config.adapter.backend = backend,
                Err(e) => tracing::warn!("Ignoring ADAPTER_BACKEND: {}", e),
            }
        }
        if let Ok(v) = env::var("ADAPTER_LISTEN_ADDR") {
            if !v.is_empty() {
                config.adapter.listen_addr = v;
            }
        }
        if let Ok(v) = env::var("ADAPTER_TOKEN") {
            config.adapter.token = v;
        }

        // TLS overrides
        if let Ok(v) = env::var("ADAPTER_TLS_ENABLED") {
            if let Ok(enabled) = v.parse::<bool>() {
                config.tls.enabled = enabled;
            }
        }
        if let Ok(v) = env::var("ADAPTER_TLS_DIR") {
            let dir = PathBuf::from(v);
            config.tls.ca_cert = dir.join("ca-cert.pem");
            config.tls.cert = dir.join("server-cert.pem");
            config.tls.key = dir.join("server-key.pem");
        }

        // Store overrides
        if let Ok(v) = env::var("MONGO_URL") {
            config.mongo.url = v;
        }
        if let Ok(v) = env::var("REDIS_URL") {
            config.redis.url = v;
        }
        if let Ok(v) = env::var("REDIS_MAX_IDLE") {
            if let Ok(n) = v.parse::<usize>() {
                config.redis.max_idle = n;
            }
        }
        if let Ok(v) = env::var("CLICKHOUSE_URL") {
            config.clickhouse.url = v;
        }

        if let Ok(v) = env::var("CACHE_CAPACITY") {
            if let Ok(n) = v.parse::<usize>() {
                config.cache.capacity = n;
            }
        }
        if let Ok(v) = env::var("BACKEND_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.backend.connect_timeout_secs = secs;
            }
        }
        if let Ok(v) = env::var("BACKEND_OPERATION_TIMEOUT_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.backend.operation_timeout_secs = secs;
            }
        }

        // Metrics overrides
        if let Ok(v) = env::var("METRICS_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                config.metrics.port = port;
            }
        }

        // Log overrides
        if let Ok(v) = env::var("LOG_DIR") {
            if !v.is_empty() {
                config.logs.dir = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = env::var("LOG_SHIP_URL") {
            if !v.is_empty() {
                match config.logs.ship.as_mut() {
                    Some(ship) => ship.url = v,
                    None => config.logs.ship = Some(LogShipConfig::new(v)),
                }
            }
        }

        config
    }

    /// Reject configurations the adapters cannot run with
    pub fn validated(self) -> AdapterResult<Self> {
        if self.adapter.token.is_empty() {
            return Err(AdapterError::ConfigurationError(
                "adapter.token must not be empty".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(AdapterError::ConfigurationError(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        if let Some(ship) = &self.logs.ship {
            if self.adapter.kind == AdapterKind::Telemetry {
                return Err(AdapterError::ConfigurationError(
                    "logs.ship cannot be used by the telemetry adapter itself".to_string(),
                ));
            }
            if ship.buffer == 0 {
                return Err(AdapterError::ConfigurationError(
                    "logs.ship.buffer must be at least 1".to_string(),
                ));
            }
        }
        Ok(self)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.operation_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.adapter.kind, AdapterKind::Chat);
        assert_eq!(config.adapter.listen_addr, "0.0.0.0:8082");
        assert_eq!(config.cache.capacity, 20);
        assert_eq!(config.redis.max_idle, 5);
        assert_eq!(config.metrics.port, 2114);
        assert!(config.tls.enabled);
    }

    #[test]
    fn test_empty_token_rejected() {
        let err = Config::default().validated().unwrap_err();
        assert!(err.to_string().contains("adapter.token"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.adapter.token = "secret".to_string();
        config.cache.capacity = 0;
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("redis".parse::<AdapterKind>().unwrap(), AdapterKind::Users);
        assert_eq!(
            "Telemetry".parse::<AdapterKind>().unwrap(),
            AdapterKind::Telemetry
        );
        assert!("postgres".parse::<AdapterKind>().is_err());
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: These are test environment variables and we're in a controlled test environment
        unsafe {
            env::set_var("ADAPTER_KIND", "telemetry");
            env::set_var("ADAPTER_TOKEN", "sometoken");
            env::set_var("CACHE_CAPACITY", "5");
            env::set_var("METRICS_PORT", "3000");
        }

        let config = Config::from_env(Config::default());

        assert_eq!(config.adapter.kind, AdapterKind::Telemetry);
        assert_eq!(config.adapter.token, "sometoken");
        assert_eq!(config.cache.capacity, 5);
        assert_eq!(config.metrics.port, 3000);

        // SAFETY: These are test environment variables and we're in a controlled test environment
        unsafe {
            env::remove_var("ADAPTER_KIND");
            env::remove_var("ADAPTER_TOKEN");
            env::remove_var("CACHE_CAPACITY");
            env::remove_var("METRICS_PORT");
        }
    }

    #[test]
    #[serial]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "adapter:\n  kind: users\n  backend: memory\n  token: filetoken\nredis:\n  max_idle: 2\n"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.adapter.kind, AdapterKind::Users);
        assert_eq!(config.adapter.backend, BackendKind::Memory);
        assert_eq!(config.adapter.token, "filetoken");
        assert_eq!(config.redis.max_idle, 2);
        // Untouched sections fall back to defaults
        assert_eq!(config.cache.capacity, 20);
    }

    #[test]
    fn test_backend_named_after_store() {
        let config: Config =
            serde_yaml::from_str("adapter:\n  kind: telemetry\n  backend: clickhouse\n").unwrap();
        assert_eq!(config.adapter.backend, BackendKind::Native);
        assert_eq!(config.adapter.listen_addr, "0.0.0.0:8082");
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config::default();

        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert_eq!(config.redis.idle_check(), Duration::from_secs(60));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let mut config = Config::default();
        config.adapter.token = "sometoken".to_string();
        config.clickhouse.user = Some("default".to_string());
        config.clickhouse.password = Some("hunter2".to_string());

        let printed = format!("{config:?}");
        assert!(!printed.contains("sometoken"));
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
        assert!(printed.contains("default"));
    }

    #[test]
    fn test_log_shipping_section() {
        let config: Config = serde_yaml::from_str(
            "adapter:\n  kind: chat\n  token: t\nlogs:\n  dir: /var/log/adapters\n  ship:\n    url: https://telemetry:8082\n",
        )
        .unwrap();
        let ship = config.logs.ship.clone().unwrap();
        assert_eq!(ship.db, "logs");
        assert_eq!(ship.table, "adapter_logs");
        assert_eq!(ship.buffer, 1024);
        assert_eq!(config.logs.dir, Some(PathBuf::from("/var/log/adapters")));
        assert!(config.clone().validated().is_ok());

        let mut telemetry = config;
        telemetry.adapter.kind = AdapterKind::Telemetry;
        let err = telemetry.validated().unwrap_err();
        assert!(err.to_string().contains("logs.ship"));
    }
}
