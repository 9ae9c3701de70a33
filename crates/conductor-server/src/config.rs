//! Server configuration loading from file and environment variables.

use conductor_client::RetryPolicy;
use conductor_engine::EngineConfig;
use conductor_types::Collaborator;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Collaborator call retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Workflow engine settings.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Per-collaborator overrides, keyed by collaborator name.
    #[serde(default)]
    pub services: BTreeMap<Collaborator, ServiceConfig>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "conductor_engine=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Pause between steps. Demo deployments set this to make progress
    /// visible on the status stream.
    #[serde(default)]
    pub step_delay_ms: u64,

    /// Cancel a run when its status connection closes.
    #[serde(default = "default_true")]
    pub cancel_on_disconnect: bool,

    /// How long shutdown waits for in-flight runs before cancelling them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// Location of one collaborator. Unset fields use the deployment defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    7000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    conductor_client::config::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Default base URL and per-attempt timeout of each collaborator.
fn default_service(collaborator: Collaborator) -> (&'static str, u64) {
    match collaborator {
        Collaborator::Vad => ("http://vad-service:7001", 10),
        Collaborator::Asr => ("http://asr-service:7002", 30),
        Collaborator::Llm => ("http://llm-service:7003", 120),
        Collaborator::Tts => ("http://tts-service:7004", 60),
        Collaborator::Memory => ("http://memory-service:7005", 10),
        Collaborator::Intent => ("http://intent-service:7006", 10),
    }
}

/// Environment variable that overrides a collaborator's base URL.
fn service_url_var(collaborator: Collaborator) -> &'static str {
    match collaborator {
        Collaborator::Vad => "VAD_SERVICE_URL",
        Collaborator::Asr => "ASR_SERVICE_URL",
        Collaborator::Intent => "INTENT_SERVICE_URL",
        Collaborator::Memory => "MEMORY_SERVICE_URL",
        Collaborator::Llm => "LLM_SERVICE_URL",
        Collaborator::Tts => "TTS_SERVICE_URL",
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
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

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_delay_ms: 0,
            cancel_on_disconnect: true,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            step_delay: Duration::from_millis(self.step_delay_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    /// Base URL and per-attempt timeout for `collaborator`, with defaults
    /// filled in.
    pub fn service(&self, collaborator: Collaborator) -> (String, Duration) {
        let (default_url, default_timeout) = default_service(collaborator);
        let configured = self.services.get(&collaborator);
        let url = configured
            .and_then(|s| s.url.clone())
            .unwrap_or_else(|| default_url.to_string());
        let timeout = configured
            .and_then(|s| s.timeout_secs)
            .unwrap_or(default_timeout);
        (url, Duration::from_secs(timeout))
    }

    /// Every collaborator's resolved location.
    pub fn service_map(&self) -> BTreeMap<Collaborator, (String, Duration)> {
        Collaborator::ALL
            .iter()
            .map(|c| (*c, self.service(*c)))
            .collect()
    }

    /// Applies overrides from `lookup`, a variable name → value function.
    ///
    /// - `CONDUCTOR_HOST` overrides `server.host`
    /// - `CONDUCTOR_PORT` overrides `server.port`
    /// - `CONDUCTOR_LOG_LEVEL` overrides `logging.level`
    /// - `CONDUCTOR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
    /// - `<NAME>_SERVICE_URL` overrides `services.<name>.url`
    ///
    /// Unparseable host and port values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CONDUCTOR_HOST") {
            if let Ok(parsed) = host.parse() {
                self.server.host = parsed;
            }
        }
        if let Some(port) = lookup("CONDUCTOR_PORT") {
            if let Ok(parsed) = port.parse() {
                self.server.port = parsed;
            }
        }
        if let Some(level) = lookup("CONDUCTOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("CONDUCTOR_LOG_JSON") {
            self.logging.json = json == "true" || json == "1";
        }
        for collaborator in Collaborator::ALL {
            if let Some(url) = lookup(service_url_var(collaborator)) {
                self.services.entry(collaborator).or_default().url = Some(url);
            }
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`Config::apply_overrides`]).
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

    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}
