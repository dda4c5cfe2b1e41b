// Client-side defaults for admin requests and pulls.
use anyhow::{Context, Result};
use serde::Deserialize;
use sluice_wire::subjects::DEFAULT_API_PREFIX;
use std::fs;
use std::time::Duration;

pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_FETCH_BATCH: usize = 100;
pub(crate) const DEFAULT_FETCH_EXPIRES_MS: u64 = 30_000;

/// Slack added to a pull's `expires` before the client gives up on the server's
/// 408. The local timer is only a backstop for an unresponsive server; a live
/// server ends the pull at `expires`.
///
/// Override with `SLUICE_FETCH_EXPIRES_GRACE_MS`.
pub(crate) const DEFAULT_FETCH_EXPIRES_GRACE_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_prefix: String,
    pub request_timeout: Duration,
    /// Batch size when neither the caller nor the consumer's `max_batch` sets one.
    pub default_batch: usize,
    pub default_expires: Duration,
    /// How long past `expires` a pull waits for the server's 408 before ending
    /// on its own.
    pub expires_grace: Duration,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    api_prefix: Option<String>,
    request_timeout_ms: Option<u64>,
    default_batch: Option<usize>,
    default_expires_ms: Option<u64>,
    expires_grace_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            default_batch: DEFAULT_FETCH_BATCH,
            default_expires: Duration::from_millis(DEFAULT_FETCH_EXPIRES_MS),
            expires_grace: Duration::from_millis(DEFAULT_FETCH_EXPIRES_GRACE_MS),
        }
    }
}

impl ClientConfig {
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("SLUICE_CLIENT_CONFIG").ok());
        let contents = match override_path.as_deref() {
            Some(path) => Some(
                fs::read_to_string(path).with_context(|| format!("read client config: {path}"))?,
            ),
            None => None,
        };
        if let Some(contents) = contents {
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
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
        if let Some(value) = read_u64_env("SLUICE_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(value);
        }
        if let Some(value) = read_usize_env("SLUICE_FETCH_BATCH") {
            config.default_batch = value;
        }
        if let Some(value) = read_u64_env("SLUICE_FETCH_EXPIRES_MS") {
            config.default_expires = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("SLUICE_FETCH_EXPIRES_GRACE_MS") {
            config.expires_grace = Duration::from_millis(value);
        }
        config
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(value) = &self.api_prefix
            && !value.is_empty()
        {
            config.api_prefix = value.clone();
        }
        if let Some(value) = self.request_timeout_ms
            && value > 0
        {
            config.request_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.default_batch
            && value > 0
        {
            config.default_batch = value;
        }
        if let Some(value) = self.default_expires_ms
            && value > 0
        {
            config.default_expires = Duration::from_millis(value);
        }
        if let Some(value) = self.expires_grace_ms
            && value > 0
        {
            config.expires_grace = Duration::from_millis(value);
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
