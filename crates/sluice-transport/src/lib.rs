// Transport contract used by the pull client and the in-process stream server.
//
// A transport moves subject-addressed messages, owns subscription and timer
// registrations, and reports how many of each are alive. Everything the pull
// engine opens here it must close again; `listener_count` and `timer_count`
// exist so tests can check that.
use bytes::Bytes;
use sluice_wire::Headers;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

mod local;

pub use local::LocalConnection;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("no async runtime available to drive timers")]
    NoRuntime,
    #[error("invalid subject {0:?}")]
    InvalidSubject(String),
}

/// Registration handle returned by [`Transport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    pub(crate) key: usize,
    pub(crate) serial: u64,
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.serial)
    }
}

/// Registration handle returned by [`Transport::register_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Message handed to [`Transport::publish`].
///
/// ```
/// use sluice_transport::OutboundMessage;
///
/// let message = OutboundMessage::new("orders.eu", "hello").with_reply("_INBOX.x.1");
/// assert_eq!(message.reply.as_deref(), Some("_INBOX.x.1"));
/// assert!(message.headers.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Option<Headers>,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: None,
            payload: payload.into(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Message delivered to a subscription handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subscription: SubscriptionId,
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Option<Headers>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Message(InboundMessage),
    /// The connection shut down; no further events follow.
    Closed,
}

/// Per-subscription callback. Calls for one subscription never overlap.
pub type MessageHandler = Arc<dyn Fn(SubscriptionEvent) + Send + Sync>;

/// One-shot timer callback.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

pub trait Transport: Send + Sync {
    fn subscribe(&self, subject: &str, handler: MessageHandler) -> Result<SubscriptionId>;

    /// Removing an unknown or already removed id is a no-op.
    fn unsubscribe(&self, id: SubscriptionId);

    fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Run `callback` once after `after` unless cancelled first.
    fn register_timer(&self, after: Duration, callback: TimerCallback) -> Result<TimerId>;

    /// Cancelling an unknown, fired, or already cancelled timer is a no-op.
    fn cancel_timer(&self, id: TimerId);

    /// A subject unique to this connection, suitable as a reply target.
    fn new_inbox(&self) -> String;

    fn listener_count(&self) -> usize;

    fn timer_count(&self) -> usize;

    fn is_closed(&self) -> bool;

    /// Drop every registration and notify handlers with [`SubscriptionEvent::Closed`].
    fn close(&self);
}

/// Validate a subject or subscription pattern.
pub(crate) fn validate_subject(subject: &str, allow_wildcards: bool) -> Result<()> {
    let invalid = subject.is_empty()
        || subject.split('.').enumerate().any(|(index, token)| {
            let last = index == subject.split('.').count() - 1;
            token.is_empty()
                || token.chars().any(char::is_whitespace)
                || (!allow_wildcards && (token == "*" || token == ">"))
                || (token == ">" && !last)
        });
    if invalid {
        return Err(TransportError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_validation() {
        assert!(validate_subject("orders.eu", false).is_ok());
        assert!(validate_subject("orders.*", true).is_ok());
        assert!(validate_subject("orders.>", true).is_ok());
        assert!(validate_subject("orders.*", false).is_err());
        assert!(validate_subject("orders..eu", true).is_err());
        assert!(validate_subject("orders.>.eu", true).is_err());
        assert!(validate_subject("", true).is_err());
        assert!(validate_subject("orders eu", true).is_err());
    }
}
