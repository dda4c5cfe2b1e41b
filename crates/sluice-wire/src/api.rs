// Admin API request and response bodies.
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    /// Subjects captured by the stream. Empty means just the stream name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
        }
    }

    /// Subjects the stream listens on.
    pub fn effective_subjects(&self) -> Vec<String> {
        if self.subjects.is_empty() {
            vec![self.name.clone()]
        } else {
            self.subjects.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub config: StreamConfig,
    pub state: StreamState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    #[default]
    All,
    Last,
    New,
    ByStartSequence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    #[default]
    Explicit,
    None,
    All,
}

/// Server-side consumer configuration. The client only reads it to compute
/// pull defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub deliver_policy: DeliverPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt_start_seq: Option<u64>,
    #[serde(default)]
    pub ack_policy: AckPolicy,
    #[serde(default = "default_ack_wait", with = "crate::nanos")]
    pub ack_wait: Duration,
    /// Zero or negative means unlimited.
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,
    #[serde(default)]
    pub max_waiting: usize,
    /// Largest batch a single pull may ask for. Zero means unlimited.
    #[serde(default)]
    pub max_batch: usize,
    /// Largest max_bytes a single pull may ask for. Zero means unlimited.
    #[serde(default)]
    pub max_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<String>,
}

pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WAITING: usize = 512;

fn default_ack_wait() -> Duration {
    DEFAULT_ACK_WAIT
}

fn default_max_deliver() -> i64 {
    -1
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            durable_name: None,
            name: None,
            deliver_policy: DeliverPolicy::All,
            opt_start_seq: None,
            ack_policy: AckPolicy::Explicit,
            ack_wait: DEFAULT_ACK_WAIT,
            max_deliver: -1,
            max_waiting: DEFAULT_MAX_WAITING,
            max_batch: 0,
            max_bytes: 0,
            filter_subject: None,
        }
    }
}

impl ConsumerConfig {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            durable_name: Some(name.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConsumerRequest {
    pub stream_name: String,
    pub config: ConsumerConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub consumer_seq: u64,
    pub stream_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub stream_name: String,
    pub name: String,
    pub config: ConsumerConfig,
    pub delivered: SequenceInfo,
    pub ack_floor: SequenceInfo,
    pub num_ack_pending: usize,
    pub num_redelivered: usize,
    pub num_waiting: usize,
    pub num_pending: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubAck {
    pub stream: String,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("api error {code} ({err_code}): {description}")]
pub struct ApiError {
    pub code: u16,
    #[serde(default)]
    pub err_code: u32,
    pub description: String,
}

impl ApiError {
    pub const STREAM_NOT_FOUND: u32 = 10059;
    pub const CONSUMER_NOT_FOUND: u32 = 10014;
    pub const STREAM_NAME_IN_USE: u32 = 10058;
    pub const BAD_REQUEST: u32 = 10003;

    pub fn not_found(err_code: u32, description: impl Into<String>) -> Self {
        Self {
            code: 404,
            err_code,
            description: description.into(),
        }
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self {
            code: 400,
            err_code: Self::BAD_REQUEST,
            description: description.into(),
        }
    }
}

/// Either `{"error": {...}}` or the success body.
///
/// ```
/// use sluice_wire::{ApiResponse, DeleteResponse};
///
/// let body = br#"{"error":{"code":404,"err_code":10014,"description":"consumer not found"}}"#;
/// let response: ApiResponse<DeleteResponse> = serde_json::from_slice(body).expect("decode");
/// let err = response.into_result().expect_err("api error");
/// assert_eq!(err.code, 404);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Err { error: ApiError },
    Ok(T),
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> std::result::Result<T, ApiError> {
        match self {
            ApiResponse::Ok(value) => Ok(value),
            ApiResponse::Err { error } => Err(error),
        }
    }
}

impl<T> From<std::result::Result<T, ApiError>> for ApiResponse<T> {
    fn from(result: std::result::Result<T, ApiError>) -> Self {
        match result {
            Ok(value) => ApiResponse::Ok(value),
            Err(error) => ApiResponse::Err { error },
        }
    }
}
