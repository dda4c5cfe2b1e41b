use super::*;
use crate::config::{
    DEFAULT_FETCH_BATCH, DEFAULT_FETCH_EXPIRES_GRACE_MS, DEFAULT_FETCH_EXPIRES_MS,
    DEFAULT_REQUEST_TIMEOUT_MS,
};
use serial_test::serial;
use sluice_wire::subjects::DEFAULT_API_PREFIX;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

struct EnvGuard {
    key: &'static str,
}

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        unsafe {
            std::env::set_var(key, value);
        }
        Self { key }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            std::env::remove_var(self.key);
        }
    }
}

#[test]
#[serial]
fn config_defaults() {
    let config = ClientConfig::from_env_or_yaml(None).expect("config");
    assert_eq!(config.api_prefix, DEFAULT_API_PREFIX);
    assert_eq!(
        config.request_timeout,
        Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
    );
    assert_eq!(config.default_batch, DEFAULT_FETCH_BATCH);
    assert_eq!(
        config.default_expires,
        Duration::from_millis(DEFAULT_FETCH_EXPIRES_MS)
    );
    assert_eq!(
        config.expires_grace,
        Duration::from_millis(DEFAULT_FETCH_EXPIRES_GRACE_MS)
    );
}

#[test]
#[serial]
fn config_env_overrides() {
    let _batch = EnvGuard::set("SLUICE_FETCH_BATCH", "16");
    let _expires = EnvGuard::set("SLUICE_FETCH_EXPIRES_MS", "2500");
    let _grace = EnvGuard::set("SLUICE_FETCH_EXPIRES_GRACE_MS", "0");
    let _timeout = EnvGuard::set("SLUICE_REQUEST_TIMEOUT_MS", "not-a-number");
    let config = ClientConfig::from_env_or_yaml(None).expect("config");
    assert_eq!(config.default_batch, 16);
    assert_eq!(config.default_expires, Duration::from_millis(2500));
    assert_eq!(
        config.expires_grace,
        Duration::from_millis(DEFAULT_FETCH_EXPIRES_GRACE_MS)
    );
    assert_eq!(
        config.request_timeout,
        Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
    );
}

#[test]
#[serial]
fn config_yaml_from_env_path() {
    let mut file = NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        "api_prefix: \"$APP.API\"\ndefault_batch: 0\nexpires_grace_ms: 50\nrequest_timeout_ms: 750"
    )
    .expect("write");
    let path = file.path().to_str().expect("utf8 path");
    let _path = EnvGuard::set("SLUICE_CLIENT_CONFIG", path);
    let config = ClientConfig::from_env_or_yaml(None).expect("config");
    assert_eq!(config.api_prefix, "$APP.API");
    assert_eq!(config.default_batch, DEFAULT_FETCH_BATCH);
    assert_eq!(config.expires_grace, Duration::from_millis(50));
    assert_eq!(config.request_timeout, Duration::from_millis(750));
}

#[test]
#[serial]
fn config_rejects_bad_yaml() {
    let mut file = NamedTempFile::new().expect("tempfile");
    writeln!(file, "default_batch: [1, 2]").expect("write");
    let path = file.path().to_str().expect("utf8 path");
    let err = ClientConfig::from_env_or_yaml(Some(path)).expect_err("bad yaml");
    assert!(err.to_string().contains("parse client config yaml"));
}

#[test]
#[serial]
fn config_missing_file() {
    let err = ClientConfig::from_env_or_yaml(Some("/nonexistent/client.yaml"))
        .expect_err("missing file");
    assert!(err.to_string().contains("read client config"));
}

#[test]
fn session_only_errors() {
    assert!(PullError::Status {
        code: 409,
        description: "Exceeded MaxWaiting".to_string()
    }
    .is_session_only());
    assert!(!PullError::ConsumerDeleted.is_session_only());
    assert!(!PullError::Disconnected.is_session_only());
}
