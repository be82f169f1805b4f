//! Server configuration loading from file and environment variables.

use carebridge_voice::{BiomarkerConfig, RealtimeConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Realtime AI engine connection.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Biomarker scorer connection; an empty URL disables it.
    #[serde(default)]
    pub biomarker: BiomarkerConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "carebridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// How a new transport connection discovers which call it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// The call id arrives in the `start` message's custom parameters.
    #[default]
    StartMessage,
    /// The transport session id is passed as `?session=` on the upgrade
    /// request and looked up against the bound session ids.
    UpgradeSession,
}

impl FromStr for IdentitySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_message" => Ok(Self::StartMessage),
            "upgrade_session" => Ok(Self::UpgradeSession),
            other => Err(format!("unknown identity source: {other}")),
        }
    }
}

/// Per-call bridge behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub identity_source: IdentitySource,

    /// Inbound frames held while the AI session is configuring. The oldest
    /// frame is dropped when full.
    #[serde(default = "default_preroll_frames")]
    pub preroll_frames: usize,

    /// Concurrent bridged calls accepted before `/media` answers 503.
    #[serde(default = "default_max_active_calls")]
    pub max_active_calls: usize,

    /// Agent name reported in callback payloads.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "carebridge.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_preroll_frames() -> usize {
    // 5 s of 20 ms frames.
    250
}

fn default_max_active_calls() -> usize {
    64
}

fn default_agent_name() -> String {
    "carebridge-voice-agent".to_string()
}

fn default_callback_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            identity_source: IdentitySource::default(),
            preroll_frames: default_preroll_frames(),
            max_active_calls: default_max_active_calls(),
            agent_name: default_agent_name(),
            callback_timeout_ms: default_callback_timeout_ms(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CAREBRIDGE_HOST` overrides `server.host`
/// - `CAREBRIDGE_PORT` overrides `server.port`
/// - `CAREBRIDGE_DB_PATH` overrides `database.path`
/// - `CAREBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `CAREBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CAREBRIDGE_REALTIME_URL` overrides `realtime.url`
/// - `CAREBRIDGE_REALTIME_API_KEY`, or failing that `OPENAI_API_KEY`,
///   overrides `realtime.api_key`
/// - `CAREBRIDGE_BIOMARKER_URL` overrides `biomarker.url`
/// - `CAREBRIDGE_IDENTITY_SOURCE` overrides `bridge.identity_source`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("CAREBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CAREBRIDGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("CAREBRIDGE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("CAREBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CAREBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("CAREBRIDGE_REALTIME_URL") {
        config.realtime.url = url;
    }
    if let Some(key) = var("CAREBRIDGE_REALTIME_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
        config.realtime.api_key = key;
    }
    if let Some(url) = var("CAREBRIDGE_BIOMARKER_URL") {
        config.biomarker.url = url;
    }
    if let Some(source) = var("CAREBRIDGE_IDENTITY_SOURCE") {
        match source.parse() {
            Ok(parsed) => config.bridge.identity_source = parsed,
            Err(e) => tracing::warn!("ignoring CAREBRIDGE_IDENTITY_SOURCE: {}", e),
        }
    }
}
