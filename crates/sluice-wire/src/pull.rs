// Pull request body sent to `<prefix>.CONSUMER.MSG.NEXT.<stream>.<consumer>`.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// One bounded pull.
///
/// ```
/// use std::time::Duration;
/// use sluice_wire::PullRequest;
///
/// let request = PullRequest::new(10, Duration::from_secs(1));
/// let body = request.encode().expect("encode");
/// assert_eq!(&body[..], br#"{"batch":10,"expires":1000000000}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub batch: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<usize>,
    // Zero means "no expiry" and is only meaningful together with no_wait.
    #[serde(default, with = "crate::nanos")]
    pub expires: Duration,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::nanos::option"
    )]
    pub idle_heartbeat: Option<Duration>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_wait: bool,
}

impl PullRequest {
    pub fn new(batch: usize, expires: Duration) -> Self {
        Self {
            batch,
            max_bytes: None,
            expires,
            idle_heartbeat: None,
            no_wait: false,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(Error::Serialize)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(Error::Deserialize)
    }
}
