//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: ATNA_, nested keys separated by `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/ihe-atna/{service_name}/config.toml
//! 4. System directory: /etc/ihe-atna/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::destination::{Destination, TransportKind};
use crate::domain::SecurityDomain;
use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Where audit records are sent by default
    pub audit_repository: AuditRepositoryConfig,

    /// Node authentication (socket and TLS policy) configuration
    pub nodeauth: NodeAuthConfig,

    /// Named security domains
    #[serde(default)]
    pub security_domains: Vec<SecurityDomain>,

    /// Endpoint pattern (`scheme://host:port`) to security domain name
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    /// Domain used when no endpoint mapping matches
    #[serde(default)]
    pub default_domain: Option<SecurityDomain>,

    /// Queue strategy configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Durable broker configuration (optional)
    #[serde(default)]
    pub broker: Option<BrokerConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Audit repository endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRepositoryConfig {
    /// Repository host
    #[serde(default = "default_repository_host")]
    pub host: String,

    /// Repository port
    #[serde(default = "default_repository_port")]
    pub port: u16,

    /// Transport: UDP, TCP, TLS (two-way) or TLS_ONE_WAY
    #[serde(default)]
    pub transport: TransportKind,
}

impl AuditRepositoryConfig {
    /// Build the default destination from this configuration
    pub fn destination(&self) -> Destination {
        Destination::new(self.host.clone(), self.port, self.transport)
    }
}

/// Socket and TLS policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAuthConfig {
    /// Whether TLS connections may be made at all
    #[serde(default = "default_true")]
    pub tls_enabled: bool,

    /// Whether plain (non-TLS) connections are permitted
    ///
    /// Applies to UDP datagrams as well as plain TCP streams.
    #[serde(default = "default_true")]
    pub nontls_permitted: bool,

    /// Connection attempts before giving up
    #[serde(default = "default_socket_retries")]
    pub socket_retries: u32,

    /// Wait between connection attempts in milliseconds
    #[serde(default = "default_socket_retry_wait_ms")]
    pub socket_retry_wait_ms: u64,

    /// Read/write and handshake timeout in milliseconds
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Per-attempt connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a TLS 1.3 mutual session is watched for a server rejection, in milliseconds
    #[serde(default = "default_session_confirm_wait_ms")]
    pub session_confirm_wait_ms: u64,
}

impl NodeAuthConfig {
    pub fn socket_retry_wait(&self) -> Duration {
        Duration::from_millis(self.socket_retry_wait_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn session_confirm_wait(&self) -> Duration {
        Duration::from_millis(self.session_confirm_wait_ms)
    }
}

impl Default for NodeAuthConfig {
    fn default() -> Self {
        Self {
            tls_enabled: true,
            nontls_permitted: true,
            socket_retries: default_socket_retries(),
            socket_retry_wait_ms: default_socket_retry_wait_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            session_confirm_wait_ms: default_session_confirm_wait_ms(),
        }
    }
}

/// Delivery strategy used by [`crate::queue::build_queue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStrategy {
    /// Send inline on the calling task
    #[default]
    Sync,
    /// Fire-and-forget on a worker runtime
    Pooled,
    /// Publish to a durable broker
    Broker,
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Delivery strategy
    #[serde(default)]
    pub strategy: QueueStrategy,

    /// How long shutdown waits for in-flight pooled sends, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl QueueConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            strategy: QueueStrategy::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Durable broker (NATS JetStream) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// NATS server URL
    pub url: String,

    /// Subject audit records are published on
    #[serde(default = "default_broker_subject")]
    pub subject: String,

    /// JetStream stream backing the subject
    #[serde(default = "default_broker_stream")]
    pub stream: String,

    /// Connection name
    #[serde(default)]
    pub name: Option<String>,

    /// Durable consumer name used by the relay that drains the stream
    #[serde(default = "default_broker_consumer")]
    pub consumer: String,

    /// Maximum retry attempts for initial connection
    #[serde(default = "default_broker_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_broker_retry_delay")]
    pub retry_delay_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_repository_host() -> String {
    "127.0.0.1".to_string()
}

fn default_repository_port() -> u16 {
    514
}

fn default_true() -> bool {
    true
}

fn default_socket_retries() -> u32 {
    3
}

fn default_socket_retry_wait_ms() -> u64 {
    2000
}

fn default_socket_timeout_ms() -> u64 {
    60000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_session_confirm_wait_ms() -> u64 {
    250
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_broker_subject() -> String {
    "atna.audit".to_string()
}

fn default_broker_stream() -> String {
    "ATNA_AUDIT".to_string()
}

fn default_broker_consumer() -> String {
    "atna-relay".to_string()
}

fn default_broker_max_retries() -> u32 {
    5
}

fn default_broker_retry_delay() -> u64 {
    2
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/ihe-atna/{service_name}/config.toml
    /// 3. System directory: /etc/ihe-atna/{service_name}/config.toml
    ///
    /// Environment variables (ATNA_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "ihe-atna".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("ATNA_").split("__"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ATNA_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Find all possible config file paths for a service, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("ihe-atna");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc/ihe-atna")
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    /// Get the default audit destination
    pub fn destination(&self) -> Destination {
        self.audit_repository.destination()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "ihe-atna".to_string(),
                log_level: default_log_level(),
            },
            audit_repository: AuditRepositoryConfig {
                host: default_repository_host(),
                port: default_repository_port(),
                transport: TransportKind::default(),
            },
            nodeauth: NodeAuthConfig::default(),
            security_domains: Vec::new(),
            endpoints: BTreeMap::new(),
            default_domain: None,
            queue: QueueConfig::default(),
            broker: None,
        }
    }
}
