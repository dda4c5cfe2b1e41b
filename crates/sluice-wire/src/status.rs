// Status frames: header-only control messages a server interleaves with data.
//
// The wire does not distinguish them by type, only by the `Status` header, so
// decode once at the boundary into `Frame` and let the pull engine match on a
// closed set of kinds.
use crate::{DESCRIPTION_HEADER, Error, Headers, Result, STATUS_HEADER};

pub const IDLE_HEARTBEAT: u16 = 100;
pub const NO_MESSAGES: u16 = 404;
pub const REQUEST_TIMEOUT: u16 = 408;
pub const CONFLICT: u16 = 409;

pub const DESC_IDLE_HEARTBEAT: &str = "Idle Heartbeat";
pub const DESC_NO_MESSAGES: &str = "No Messages";
pub const DESC_REQUEST_TIMEOUT: &str = "Request Timeout";
pub const DESC_MAX_BYTES: &str = "Message Size Exceeds MaxBytes";
pub const DESC_CONSUMER_DELETED: &str = "Consumer Deleted";
pub const DESC_MAX_WAITING: &str = "Exceeded MaxWaiting";
pub const DESC_MAX_REQUEST_BATCH: &str = "Exceeded MaxRequestBatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    IdleHeartbeat,
    NoMessages,
    RequestTimeout,
    MaxBytesExceeded,
    ConsumerDeleted,
    ExceededMaxWaiting,
    ExceededMaxRequestBatch,
    /// Known header shape, unknown meaning.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub code: u16,
    pub description: Option<String>,
    pub kind: StatusKind,
}

impl StatusFrame {
    pub fn new(code: u16, description: Option<String>) -> Self {
        let kind = classify(code, description.as_deref());
        Self {
            code,
            description,
            kind,
        }
    }

    pub fn idle_heartbeat() -> Self {
        Self::new(IDLE_HEARTBEAT, Some(DESC_IDLE_HEARTBEAT.to_string()))
    }

    pub fn no_messages() -> Self {
        Self::new(NO_MESSAGES, Some(DESC_NO_MESSAGES.to_string()))
    }

    pub fn request_timeout() -> Self {
        Self::new(REQUEST_TIMEOUT, Some(DESC_REQUEST_TIMEOUT.to_string()))
    }

    pub fn conflict(description: impl Into<String>) -> Self {
        Self::new(CONFLICT, Some(description.into()))
    }

    /// Ends the pull without an error: the batch is simply shorter.
    pub fn is_normal_end(&self) -> bool {
        matches!(
            self.kind,
            StatusKind::NoMessages | StatusKind::RequestTimeout | StatusKind::MaxBytesExceeded
        )
    }

    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(STATUS_HEADER, self.code.to_string());
        if let Some(description) = &self.description {
            headers.insert(DESCRIPTION_HEADER, description.clone());
        }
        headers
    }
}

fn classify(code: u16, description: Option<&str>) -> StatusKind {
    let description = description.unwrap_or_default();
    match code {
        IDLE_HEARTBEAT => StatusKind::IdleHeartbeat,
        NO_MESSAGES => StatusKind::NoMessages,
        REQUEST_TIMEOUT => StatusKind::RequestTimeout,
        CONFLICT if description.starts_with(DESC_MAX_BYTES) => StatusKind::MaxBytesExceeded,
        CONFLICT if description.starts_with(DESC_CONSUMER_DELETED) => StatusKind::ConsumerDeleted,
        CONFLICT if description.starts_with(DESC_MAX_WAITING) => StatusKind::ExceededMaxWaiting,
        CONFLICT if description.starts_with(DESC_MAX_REQUEST_BATCH) => {
            StatusKind::ExceededMaxRequestBatch
        }
        _ => StatusKind::Unrecognized,
    }
}

/// A delivery as seen by the pull engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data,
    Status(StatusFrame),
}

impl Frame {
    /// Decode the frame kind from optional headers.
    ///
    /// ```
    /// use sluice_wire::{Frame, Headers, StatusKind};
    ///
    /// let headers: Headers = [("Status", "404"), ("Description", "No Messages")]
    ///     .into_iter()
    ///     .collect();
    /// match Frame::classify(Some(&headers)).expect("classify") {
    ///     Frame::Status(status) => assert_eq!(status.kind, StatusKind::NoMessages),
    ///     Frame::Data => panic!("expected status"),
    /// }
    /// assert_eq!(Frame::classify(None).expect("classify"), Frame::Data);
    /// ```
    pub fn classify(headers: Option<&Headers>) -> Result<Self> {
        let Some(raw) = headers.and_then(|headers| headers.get(STATUS_HEADER)) else {
            return Ok(Frame::Data);
        };
        let code = raw
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::InvalidStatus(raw.to_string()))?;
        let description = headers
            .and_then(|headers| headers.get(DESCRIPTION_HEADER))
            .map(str::to_string);
        Ok(Frame::Status(StatusFrame::new(code, description)))
    }
}
