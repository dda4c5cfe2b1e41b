// Protocol types shared by the pull client and the in-process stream server.
//
// Nothing here performs I/O. The transport moves `Headers` + payload bytes; this
// crate gives those bytes meaning: pull requests, status frames, ack verbs, ack
// reply-subject metadata, and admin API bodies.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod ack;
pub mod api;
pub mod pull;
pub mod status;
pub mod subjects;

mod nanos;

pub use ack::{AckKind, MessageInfo};
pub use api::{
    AckPolicy, ApiError, ApiResponse, ConsumerConfig, ConsumerInfo, CreateConsumerRequest,
    DeleteResponse, DeliverPolicy, PubAck, SequenceInfo, StreamConfig, StreamInfo, StreamState,
};
pub use pull::PullRequest;
pub use status::{Frame, StatusFrame, StatusKind};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize message")]
    Serialize(serde_json::Error),
    #[error("failed to deserialize message")]
    Deserialize(serde_json::Error),
    #[error("invalid status header: {0:?}")]
    InvalidStatus(String),
    #[error("invalid ack payload: {0:?}")]
    InvalidAck(String),
    #[error("invalid ack reply subject: {0:?}")]
    InvalidReplySubject(String),
    #[error("invalid name {0:?}: must be non-empty and free of '.', '*', '>' and whitespace")]
    InvalidName(String),
}

/// Header carrying the numeric status code of a control frame.
pub const STATUS_HEADER: &str = "Status";
/// Header carrying the human readable status description.
pub const DESCRIPTION_HEADER: &str = "Description";
/// Header carrying the stream subject of a message delivered to a pull inbox.
pub const SUBJECT_HEADER: &str = "Original-Subject";

/// Message headers. Keys are compared case-sensitively.
///
/// ```
/// use sluice_wire::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Status", "404");
/// assert_eq!(headers.get("Status"), Some("404"));
/// assert!(headers.get("status").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Reject stream/consumer names that would corrupt subject tokenization.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
    if bad {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_from_iter_and_lookup() {
        let headers: Headers = [("Status", "408"), ("Description", "Request Timeout")]
            .into_iter()
            .collect();
        assert_eq!(headers.get(STATUS_HEADER), Some("408"));
        assert_eq!(headers.get(DESCRIPTION_HEADER), Some("Request Timeout"));
        assert_eq!(headers.iter().count(), 2);
    }

    #[test]
    fn validate_name_rejects_subject_tokens() {
        assert!(validate_name("ORDERS").is_ok());
        assert!(validate_name("worker-1").is_ok());
        for bad in ["", "a.b", "a*", "a>", "a b"] {
            let err = validate_name(bad).expect_err("invalid");
            assert!(matches!(err, Error::InvalidName(name) if name == bad));
        }
    }
}
