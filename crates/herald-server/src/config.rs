//! Server configuration.
//!
//! Configuration is loaded from:
//! - a TOML file (`--config`, or the first of the default paths that exists)
//! - environment variables (`HERALD_*`, nested keys separated by `__`)

use anyhow::{Context, Result};
use herald_core::{AuthConfig, Hosts, RouterConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files probed when no path is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "herald.toml",
    "/etc/herald/herald.toml",
    "~/.config/herald/herald.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hosts to bind to, one listener each. Also the fallback auth hosts.
    #[serde(default = "default_host")]
    pub host: Hosts,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hosts of the application serving the auth endpoint.
    #[serde(default)]
    pub auth_host: Option<Hosts>,

    /// Path of the auth endpoint.
    #[serde(default = "default_auth_endpoint")]
    pub auth_endpoint: String,

    /// Scheme for auth hosts configured without one.
    #[serde(default = "default_auth_protocol")]
    pub auth_protocol: String,

    /// Auth request timeout in milliseconds.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_ms: u64,

    /// Verbose diagnostics.
    #[serde(default)]
    pub dev_mode: bool,

    /// Applications allowed to use the HTTP API.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Presence store backend.
    #[serde(default)]
    pub database: DatabaseKind,

    /// Presence store settings.
    #[serde(default)]
    pub database_config: DatabaseConfig,

    /// Enabled event sources.
    #[serde(default)]
    pub subscribers: SubscribersConfig,

    /// CORS settings of the HTTP API.
    #[serde(default)]
    pub api_origin_allow: ApiOriginAllow,

    /// Extra headers added to every HTTP response.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// An application allowed to call the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application id used in `/apps/{app_id}/..` paths.
    pub app_id: String,
    /// Secret key.
    pub key: String,
}

/// Presence store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// Process-local memory.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis,
    /// Local SQLite file.
    Sqlite,
}

/// Presence store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Redis settings, shared with the Redis event source.
    #[serde(default)]
    pub redis: RedisConfig,

    /// SQLite settings.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Publish presence list changes on `PresenceChannelUpdated`.
    #[serde(default)]
    pub publish_presence: bool,
}

/// Redis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix the application puts in front of channel names.
    #[serde(default)]
    pub key_prefix: String,
}

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file.
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,
}

/// Enabled event sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribersConfig {
    /// `POST /apps/{app_id}/events`.
    #[serde(default = "default_true")]
    pub http: bool,

    /// Redis pub/sub.
    #[serde(default)]
    pub redis: bool,
}

/// CORS settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiOriginAllow {
    /// Add CORS headers.
    #[serde(default)]
    pub allow_cors: bool,

    /// Allowed origin, `*` for any.
    #[serde(default)]
    pub allow_origin: String,

    /// Comma-separated allowed methods.
    #[serde(default)]
    pub allow_methods: String,

    /// Comma-separated allowed headers.
    #[serde(default)]
    pub allow_headers: String,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Events buffered between ingestion and dispatch.
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    /// Frames buffered per socket before new ones are dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between server pings in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> Hosts {
    Hosts::One("127.0.0.1".to_string())
}

fn default_port() -> u16 {
    6001
}

fn default_auth_endpoint() -> String {
    herald_core::auth::DEFAULT_AUTH_ENDPOINT.to_string()
}

fn default_auth_protocol() -> String {
    herald_core::auth::DEFAULT_AUTH_PROTOCOL.to_string()
}

fn default_auth_timeout() -> u64 {
    30_000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("database/herald.sqlite")
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/socket".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_ingest_queue_capacity() -> usize {
    1024
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    25_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_host: None,
            auth_endpoint: default_auth_endpoint(),
            auth_protocol: default_auth_protocol(),
            auth_timeout_ms: default_auth_timeout(),
            dev_mode: false,
            clients: Vec::new(),
            database: DatabaseKind::default(),
            database_config: DatabaseConfig::default(),
            subscribers: SubscribersConfig::default(),
            api_origin_allow: ApiOriginAllow::default(),
            headers: HashMap::new(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: String::new(),
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

impl Default for SubscribersConfig {
    fn default() -> Self {
        Self {
            http: true,
            redis: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from a file and the environment.
    ///
    /// Without an explicit path, the default paths are probed; if none
    /// exists only the environment and defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or if a file or
    /// variable cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => DEFAULT_CONFIG_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(
                config::File::from(file.as_path()).format(config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HERALD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let source = file
            .as_ref()
            .map_or_else(|| "environment".to_string(), |f| f.display().to_string());

        builder
            .build()
            .with_context(|| format!("Failed to read configuration from {source}"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from {source}"))
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    /// Socket addresses to bind to, one per configured host.
    ///
    /// # Errors
    ///
    /// Returns an error if a host cannot be resolved.
    pub fn bind_addrs(&self) -> Result<Vec<SocketAddr>> {
        let hosts = self.host.to_vec();
        let hosts = if hosts.is_empty() {
            vec!["127.0.0.1".to_string()]
        } else {
            hosts
        };

        let mut addrs = Vec::with_capacity(hosts.len());
        for host in hosts {
            let bare = host
                .split_once("://")
                .map_or(host.as_str(), |(_, rest)| rest)
                .trim_end_matches('/');
            let addr = (bare, self.port)
                .to_socket_addrs()
                .with_context(|| format!("Invalid host: {host}"))?
                .next()
                .with_context(|| format!("Host resolved to no address: {host}"))?;
            addrs.push(addr);
        }
        Ok(addrs)
    }

    /// Authorizer settings.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            endpoint: self.auth_endpoint.clone(),
            protocol: self.auth_protocol.clone(),
            timeout: Duration::from_millis(self.auth_timeout_ms),
            ..AuthConfig::default()
        }
        .with_hosts(self.auth_host.as_ref(), Some(&self.host))
    }

    /// Router settings.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            auth: self.auth_config(),
            ..RouterConfig::default()
        }
    }

    /// The key of an application, if it is a known client.
    #[must_use]
    pub fn client_key(&self, app_id: &str) -> Option<&str> {
        self.clients
            .iter()
            .find(|c| c.app_id == app_id)
            .map(|c| c.key.as_str())
    }

    /// Prefix stripped from incoming channel names.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.database_config.redis.key_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 6001);
        assert_eq!(config.auth_endpoint, "/broadcasting/auth");
        assert_eq!(config.database, DatabaseKind::Memory);
        assert!(config.subscribers.http);
        assert!(!config.subscribers.redis);
        assert_eq!(config.transport.websocket_path, "/socket");
    }

    #[test]
    fn test_config_bind_addrs() {
        let config = Config {
            host: Hosts::Many(vec!["127.0.0.1".into(), "http://0.0.0.0".into()]),
            ..Config::default()
        };
        let addrs = config.bind_addrs().unwrap();
        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().all(|a| a.port() == 6001));
        assert!(addrs[1].ip().is_unspecified());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = ["0.0.0.0"]
            port = 9000
            auth_host = "https://app.test"
            database = "sqlite"

            [[clients]]
            app_id = "app-1"
            key = "secret"

            [database_config.redis]
            key_prefix = "laravel_database_"

            [limits]
            ingest_queue_capacity = 16
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.database, DatabaseKind::Sqlite);
        assert_eq!(config.client_key("app-1"), Some("secret"));
        assert_eq!(config.client_key("app-2"), None);
        assert_eq!(config.key_prefix(), "laravel_database_");
        assert_eq!(config.limits.ingest_queue_capacity, 16);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert_eq!(config.auth_config().hosts, vec!["https://app.test"]);
    }

    #[test]
    fn test_auth_hosts_fall_back_to_bind_hosts() {
        let config = Config::default();
        let auth = config.auth_config();
        assert_eq!(auth.hosts, vec!["127.0.0.1"]);
        assert_eq!(auth.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_renders_as_toml() {
        let rendered = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.port, 6001);
    }
}
