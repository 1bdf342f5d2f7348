//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CHATWIRE_*), which supply defaults
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use chatwire_core::{HubConfig, PumpConfig};
use chatwire_protocol::DEFAULT_TOPIC;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Liveness timers.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Pub/sub fabric.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Token validation.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound queue capacity per client.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How long a client may go without answering a ping, in milliseconds.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Ping interval in milliseconds.
    #[serde(default = "default_ping_period")]
    pub ping_period_ms: u64,

    /// Per-frame write deadline in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,
}

/// Pub/sub backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process fabric; single-process deployments only.
    Memory,
    /// Redis PUBLISH/SUBSCRIBE.
    Redis,
}

/// Pub/sub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Fabric backend.
    #[serde(default = "default_backend")]
    pub backend: BrokerBackend,

    /// Backend URL (Redis only).
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Topic shared by every process.
    #[serde(default = "default_topic")]
    pub topic: String,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
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
fn default_host() -> String {
    std::env::var("CHATWIRE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("CHATWIRE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    chatwire_protocol::MAX_FRAME_SIZE
}

fn default_queue_capacity() -> usize {
    chatwire_core::DEFAULT_QUEUE_CAPACITY
}

fn default_pong_wait() -> u64 {
    60_000
}

fn default_ping_period() -> u64 {
    54_000 // 9/10 of pong_wait
}

fn default_write_wait() -> u64 {
    10_000
}

fn default_backend() -> BrokerBackend {
    if std::env::var("CHATWIRE_REDIS_URL").is_ok() {
        BrokerBackend::Redis
    } else {
        BrokerBackend::Memory
    }
}

fn default_redis_url() -> String {
    std::env::var("CHATWIRE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_jwt_secret() -> String {
    std::env::var("CHATWIRE_JWT_SECRET").unwrap_or_else(|_| "change-me".to_string())
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_ws_path(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            broker: BrokerConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: default_pong_wait(),
            ping_period_ms: default_ping_period(),
            write_wait_ms: default_write_wait(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_redis_url(),
            topic: default_topic(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
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
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the result fails validation.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "chatwire.toml",
            "/etc/chatwire/chatwire.toml",
            "~/.config/chatwire/chatwire.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check that the limits and timers are usable.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first bad setting.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.ping_period_ms >= self.heartbeat.pong_wait_ms {
            bail!(
                "heartbeat.ping_period_ms ({}) must be less than heartbeat.pong_wait_ms ({})",
                self.heartbeat.ping_period_ms,
                self.heartbeat.pong_wait_ms
            );
        }
        if self.heartbeat.ping_period_ms == 0 || self.heartbeat.write_wait_ms == 0 {
            bail!("heartbeat timers must be non-zero");
        }
        if self.limits.queue_capacity == 0 {
            bail!("limits.queue_capacity must be at least 1");
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be at least 1");
        }
        if !self.websocket_path.starts_with('/') {
            bail!("websocket_path must start with '/'");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.limits.queue_capacity,
        }
    }

    /// Pump settings derived from this configuration.
    #[must_use]
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            pong_wait: Duration::from_millis(self.heartbeat.pong_wait_ms),
            ping_period: Duration::from_millis(self.heartbeat.ping_period_ms),
            write_wait: Duration::from_millis(self.heartbeat.write_wait_ms),
            max_frame_size: self.limits.max_message_size,
        }
    }
}
