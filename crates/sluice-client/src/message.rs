// Delivered message plus its acknowledgment actions.
use bytes::Bytes;
use sluice_transport::{InboundMessage, OutboundMessage, Transport};
use sluice_wire::{AckKind, Headers, MessageInfo, SUBJECT_HEADER};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

use crate::PullError;

/// A message handed out by a pull.
///
/// Acknowledgment is fire-and-forget. The first of `ack`, `nak` or `term` is
/// sent and later ones are ignored; `working` is sent only until one of them
/// has been. Publish failures are logged, never returned, and acting after the
/// pull ended is fine.
pub struct Message {
    subject: String,
    headers: Option<Headers>,
    payload: Bytes,
    reply: String,
    info: MessageInfo,
    acked: AtomicBool,
    transport: Arc<dyn Transport>,
}

impl Message {
    pub(crate) fn from_delivery(
        inbound: InboundMessage,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PullError> {
        let reply = inbound
            .reply
            .ok_or_else(|| PullError::Protocol("data message without ack subject".to_string()))?;
        let info = MessageInfo::from_reply_subject(&reply)?;
        let mut headers = inbound.headers;
        let subject = headers
            .as_mut()
            .and_then(|headers| headers.remove(SUBJECT_HEADER))
            .unwrap_or(inbound.subject);
        let headers = headers.filter(|headers| !headers.is_empty());
        Ok(Self {
            subject,
            headers,
            payload: inbound.payload,
            reply,
            info,
            acked: AtomicBool::new(false),
            transport,
        })
    }

    /// Subject the message was published on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn info(&self) -> &MessageInfo {
        &self.info
    }

    pub fn reply_subject(&self) -> &str {
        &self.reply
    }

    /// True when this is not the first delivery.
    pub fn redelivered(&self) -> bool {
        self.info.delivered > 1
    }

    /// True once `ack`, `nak` or `term` has been sent.
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    pub fn ack(&self) {
        self.respond(AckKind::Ack);
    }

    /// Ask for redelivery, optionally not before `delay`.
    pub fn nak(&self, delay: Option<Duration>) {
        self.respond(AckKind::Nak(delay));
    }

    /// Stop redelivering this message.
    pub fn term(&self, reason: Option<&str>) {
        self.respond(AckKind::Term(reason.map(str::to_string)));
    }

    /// Reset the server's ack-wait clock for this message.
    pub fn working(&self) {
        self.respond(AckKind::Progress);
    }

    fn respond(&self, kind: AckKind) {
        if kind.is_terminal() {
            if self.acked.swap(true, Ordering::AcqRel) {
                trace!(reply = %self.reply, ?kind, "message already acknowledged");
                return;
            }
        } else if self.is_acked() {
            return;
        }
        let payload = match kind.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, ?kind, "failed to encode ack");
                return;
            }
        };
        metrics::counter!("sluice_client_acks_total").increment(1);
        if let Err(err) = self
            .transport
            .publish(OutboundMessage::new(self.reply.clone(), payload))
        {
            metrics::counter!("sluice_client_ack_errors_total").increment(1);
            warn!(
                error = %err,
                stream = %self.info.stream,
                seq = self.info.stream_sequence,
                "ack publish failed"
            );
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("headers", &self.headers)
            .field("payload_len", &self.payload.len())
            .field("info", &self.info)
            .field("acked", &self.is_acked())
            .finish()
    }
}
