// src/config.rs
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::message::Template;

/// Broker endpoint for one side of the pipeline.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionParams {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_credential")]
    pub username: String,
    #[serde(default = "default_credential")]
    pub password: String,
    #[serde(default)]
    pub heartbeat_seconds: Option<u16>,
    #[serde(default)]
    pub connection_timeout_ms: Option<u64>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            vhost: default_vhost(),
            username: default_credential(),
            password: default_credential(),
            heartbeat_seconds: None,
            connection_timeout_ms: None,
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("heartbeat_seconds", &self.heartbeat_seconds)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .finish()
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}{}", self.username, self.host, self.port, self.vhost)
    }
}

/// Exchange/queue/binding/QoS declarations needed before consuming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumeTopology {
    pub exchange: String,
    #[serde(default = "default_exchange_kind")]
    pub exchange_kind: String,
    pub queue: String,
    pub routing_key: String,
    /// Unacknowledged deliveries allowed in flight (0 means unlimited).
    #[serde(default)]
    pub prefetch: u16,
}

/// Exchange declaration and templates used when publishing results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishTopology {
    pub exchange: String,
    #[serde(default = "default_exchange_kind")]
    pub exchange_kind: String,
    pub routing_key_template: String,
    #[serde(default = "default_content_type_template")]
    pub content_type_template: String,
    /// Enable publisher confirms on the outbound channel.
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundConfig {
    #[serde(default)]
    pub connection: ConnectionParams,
    pub topology: ConsumeTopology,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundConfig {
    #[serde(default)]
    pub connection: ConnectionParams,
    pub topology: PublishTopology,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipeConfig {
    /// Deliveries with any other content-type are acknowledged and skipped.
    /// An empty string means no filter.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub content_type: Option<String>,
    pub inbound: InboundConfig,
    /// Publishing is disabled when absent.
    #[serde(default)]
    pub outbound: Option<OutboundConfig>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default = "default_requeue")]
    pub requeue_on_failure: bool,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

// Default values
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 5672 }
fn default_vhost() -> String { "/".to_string() }
fn default_credential() -> String { "guest".to_string() }
pub(crate) fn default_exchange_kind() -> String { "topic".to_string() }
pub(crate) fn default_content_type_template() -> String { "text/plain".to_string() }
pub(crate) fn default_log_level() -> String { "INFO".to_string() }
pub(crate) fn default_requeue() -> bool { true }

const KNOWN_EXCHANGE_KINDS: [&str; 4] = ["direct", "fanout", "topic", "headers"];

impl PipeConfig {
    pub fn publishes(&self) -> bool {
        self.outbound.is_some()
    }

    /// Checks everything that can be checked without a broker.
    pub fn validate(&self) -> Result<()> {
        let inbound = &self.inbound.topology;
        require("inbound exchange", &inbound.exchange)?;
        require("inbound routing key", &inbound.routing_key)?;
        require("inbound queue", &inbound.queue)?;
        check_exchange_kind(&inbound.exchange_kind)?;

        if let Some(outbound) = &self.outbound {
            let topology = &outbound.topology;
            require("outbound exchange", &topology.exchange)?;
            require("outbound routing key template", &topology.routing_key_template)?;
            check_exchange_kind(&topology.exchange_kind)?;
            Template::parse(&topology.routing_key_template)
                .context("Invalid outbound routing key template")?;
            Template::parse(&topology.content_type_template)
                .context("Invalid outbound content type template")?;
        }

        crate::logging::parse_level(&self.log.level)?;
        Ok(())
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("Configuration error: {} cannot be empty", name));
    }
    Ok(())
}

fn check_exchange_kind(kind: &str) -> Result<()> {
    // Custom exchange plugins register names like "x-delayed-message".
    if KNOWN_EXCHANGE_KINDS.contains(&kind) || kind.starts_with("x-") {
        Ok(())
    } else {
        Err(anyhow!("Configuration error: unknown exchange type '{}'", kind))
    }
}

pub const CONFIG_ENV: &str = "RABBIT_PIPE_CONFIG";

pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }

    let locations = [
        ("Current directory", Path::new("rabbit-pipe.json")),
        ("Config directory", Path::new("config/rabbit-pipe.json")),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Some(path.to_path_buf());
        }
    }

    let home_config = home::home_dir()?.join(".rabbit-pipe.json");
    if home_config.exists() {
        debug!("Found config file in home directory: {}", home_config.display());
        return Some(home_config);
    }

    None
}

pub fn load_config_file(path: &Path) -> Result<PipeConfig> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read config file at {}", path.display()))?;

    let config: PipeConfig = serde_json::from_str(&content)
        .context("Configuration file contains invalid JSON or missing required fields")?;

    config.validate()?;
    Ok(config)
}

/// Loads from a JSON file when one can be found, otherwise from the environment.
pub fn load_config(publish: bool) -> Result<PipeConfig> {
    dotenv::dotenv().ok();
    match find_config_file() {
        Some(path) => load_config_file(&path),
        None => crate::env::from_env(publish),
    }
}
