// Stream server configuration: defaults, env overrides, optional YAML file.
use anyhow::{Context, Result};
use serde::Deserialize;
use sluice_wire::subjects::DEFAULT_API_PREFIX;
use std::fs;
use std::time::Duration;

pub(crate) const DEFAULT_TICK_INTERVAL_MS: u64 = 10;
pub(crate) const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    // Subject prefix of the admin API.
    pub api_prefix: String,
    // Resolution of heartbeats, expiries, and ack-wait redelivery.
    pub tick_interval: Duration,
    // Inbound messages buffered ahead of the server task.
    pub command_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            command_queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ServerConfigOverride {
    api_prefix: Option<String>,
    tick_interval_ms: Option<u64>,
    command_queue_depth: Option<usize>,
}

impl ServerConfig {
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("SLUICE_SERVER_CONFIG").ok());
        if let Some(path) = override_path.as_deref() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read server config: {path}"))?;
            let override_cfg: ServerConfigOverride =
                serde_yaml::from_str(&contents).context("parse server config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("SLUICE_API_PREFIX")
            && !value.is_empty()
        {
            config.api_prefix = value;
        }
        if let Some(value) = read_u64_env("SLUICE_SERVER_TICK_MS") {
            config.tick_interval = Duration::from_millis(value);
        }
        if let Some(value) = read_usize_env("SLUICE_SERVER_QUEUE_DEPTH") {
            config.command_queue_depth = value;
        }
        config
    }
}

impl ServerConfigOverride {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(value) = &self.api_prefix
            && !value.is_empty()
        {
            config.api_prefix = value.clone();
        }
        if let Some(value) = self.tick_interval_ms
            && value > 0
        {
            config.tick_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.command_queue_depth
            && value > 0
        {
            config.command_queue_depth = value;
        }
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}
