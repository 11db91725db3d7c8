//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use emitter_core::{BackpressureMode, EmitterConfig};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept client connections on.
    /// Override: `EMITTER_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Port to accept client connections on.
    /// Override: `EMITTER_BIND_PORT`
    pub bind_port: u16,

    /// Longest accepted inbound line (handshake or request), in bytes.
    /// Longer lines close the connection.
    /// Override: `EMITTER_MAX_REQUEST_LEN`
    pub max_request_len: usize,

    /// Session queue, backpressure and idle settings.
    pub emitter: EmitterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            bind_port: 10000,
            max_request_len: 64 * 1024,
            emitter: EmitterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_request_len == 0 {
            anyhow::bail!("max_request_len must be >= 1");
        }
        self.emitter.validate()?;
        Ok(())
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Some(ip) = env_parse("EMITTER_BIND_ADDRESS") {
            self.bind_address = ip;
        }
        if let Some(port) = env_parse("EMITTER_BIND_PORT") {
            self.bind_port = port;
        }
        if let Some(len) = env_parse("EMITTER_MAX_REQUEST_LEN") {
            self.max_request_len = len;
        }
        if let Some(capacity) = env_parse("EMITTER_QUEUE_CAPACITY") {
            self.emitter.queue_capacity = capacity;
        }
        if let Some(ms) = env_parse("EMITTER_WRITE_TIMEOUT_MS") {
            self.emitter.write_timeout_ms = ms;
        }
        if let Some(secs) = env_parse("EMITTER_IDLE_TIMEOUT_SECS") {
            self.emitter.idle_timeout_secs = secs;
        }

        if let Ok(val) = std::env::var("EMITTER_BACKPRESSURE") {
            match val.as_str() {
                "block" => self.emitter.backpressure = BackpressureMode::Block,
                "fail-fast" => self.emitter.backpressure = BackpressureMode::FailFast,
                other => log::warn!("Ignoring unknown EMITTER_BACKPRESSURE value: {}", other),
            }
        }

        // Note: EMITTER_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let val = std::env::var(key).ok()?;
    match val.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring invalid {} value: {}", key, val);
            None
        }
    }
}
