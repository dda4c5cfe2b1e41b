// Ack verbs and the metadata encoded in a delivery's reply subject.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::subjects::ACK_PREFIX;
use crate::{Error, Result};

const ACK: &str = "+ACK";
const NAK: &str = "-NAK";
const PROGRESS: &str = "+WPI";
const TERM: &str = "+TERM";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckKind {
    /// Processed; never redeliver.
    Ack,
    /// Redeliver, optionally after a delay.
    Nak(Option<Duration>),
    /// Still working; restart the ack-wait clock.
    Progress,
    /// Give up; never redeliver.
    Term(Option<String>),
}

#[derive(Serialize, Deserialize)]
struct NakBody {
    #[serde(with = "crate::nanos")]
    delay: Duration,
}

impl AckKind {
    /// Terminal verbs resolve the delivery; `Progress` does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AckKind::Progress)
    }

    pub fn encode(&self) -> Result<Bytes> {
        let text = match self {
            AckKind::Ack => ACK.to_string(),
            AckKind::Progress => PROGRESS.to_string(),
            AckKind::Nak(None) => NAK.to_string(),
            AckKind::Nak(Some(delay)) => {
                let body =
                    serde_json::to_string(&NakBody { delay: *delay }).map_err(Error::Serialize)?;
                format!("{NAK} {body}")
            }
            AckKind::Term(None) => TERM.to_string(),
            AckKind::Term(Some(reason)) => format!("{TERM} {reason}"),
        };
        Ok(Bytes::from(text))
    }

    /// Parse an ack payload. An empty payload is a plain ack.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::InvalidAck(String::from_utf8_lossy(payload).into_owned()))?
            .trim();
        if text.is_empty() || text == ACK {
            return Ok(AckKind::Ack);
        }
        if text == PROGRESS {
            return Ok(AckKind::Progress);
        }
        if let Some(rest) = text.strip_prefix(NAK) {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(AckKind::Nak(None));
            }
            let body: NakBody = serde_json::from_str(rest).map_err(Error::Deserialize)?;
            return Ok(AckKind::Nak(Some(body.delay)));
        }
        if let Some(rest) = text.strip_prefix(TERM) {
            let rest = rest.trim();
            let reason = (!rest.is_empty()).then(|| rest.to_string());
            return Ok(AckKind::Term(reason));
        }
        Err(Error::InvalidAck(text.to_string()))
    }
}

/// Delivery metadata carried in the ack reply subject:
/// `$JS.ACK.<stream>.<consumer>.<delivered>.<stream_seq>.<consumer_seq>.<ts_ns>.<pending>`.
///
/// ```
/// use sluice_wire::MessageInfo;
///
/// let info = MessageInfo::from_reply_subject("$JS.ACK.ORDERS.worker.2.17.5.1700000000000000000.3")
///     .expect("parse");
/// assert_eq!(info.stream, "ORDERS");
/// assert_eq!(info.delivered, 2);
/// assert_eq!(info.stream_sequence, 17);
/// assert_eq!(info.pending, 3);
/// assert_eq!(info.reply_subject(), "$JS.ACK.ORDERS.worker.2.17.5.1700000000000000000.3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub stream: String,
    pub consumer: String,
    /// Number of times this message has been delivered, including this one.
    pub delivered: u64,
    pub stream_sequence: u64,
    pub consumer_sequence: u64,
    pub timestamp_ns: u64,
    /// Messages still pending for the consumer after this one.
    pub pending: u64,
}

impl MessageInfo {
    pub fn from_reply_subject(subject: &str) -> Result<Self> {
        let invalid = || Error::InvalidReplySubject(subject.to_string());
        let rest = subject
            .strip_prefix(ACK_PREFIX)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(invalid)?;
        let tokens: Vec<&str> = rest.split('.').collect();
        let [
            stream,
            consumer,
            delivered,
            stream_seq,
            consumer_seq,
            timestamp,
            pending,
        ] = tokens.as_slice()
        else {
            return Err(invalid());
        };
        let number = |token: &str| token.parse::<u64>().map_err(|_| invalid());
        Ok(Self {
            stream: (*stream).to_string(),
            consumer: (*consumer).to_string(),
            delivered: number(delivered)?,
            stream_sequence: number(stream_seq)?,
            consumer_sequence: number(consumer_seq)?,
            timestamp_ns: number(timestamp)?,
            pending: number(pending)?,
        })
    }

    pub fn reply_subject(&self) -> String {
        format!(
            "{ACK_PREFIX}.{}.{}.{}.{}.{}.{}.{}",
            self.stream,
            self.consumer,
            self.delivered,
            self.stream_sequence,
            self.consumer_sequence,
            self.timestamp_ns,
            self.pending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_encode_to_protocol_text() {
        assert_eq!(AckKind::Ack.encode().expect("ack"), Bytes::from_static(b"+ACK"));
        assert_eq!(
            AckKind::Progress.encode().expect("wpi"),
            Bytes::from_static(b"+WPI")
        );
        assert_eq!(
            AckKind::Nak(Some(Duration::from_millis(5)))
                .encode()
                .expect("nak"),
            Bytes::from_static(br#"-NAK {"delay":5000000}"#)
        );
        assert_eq!(
            AckKind::Term(Some("poison".to_string()))
                .encode()
                .expect("term"),
            Bytes::from_static(b"+TERM poison")
        );
    }

    #[test]
    fn decode_accepts_every_verb() {
        assert_eq!(AckKind::decode(b"").expect("empty"), AckKind::Ack);
        assert_eq!(AckKind::decode(b"+ACK").expect("ack"), AckKind::Ack);
        assert_eq!(AckKind::decode(b"-NAK").expect("nak"), AckKind::Nak(None));
        assert_eq!(
            AckKind::decode(br#"-NAK {"delay":1000}"#).expect("nak delay"),
            AckKind::Nak(Some(Duration::from_micros(1)))
        );
        assert_eq!(AckKind::decode(b"+WPI").expect("wpi"), AckKind::Progress);
        assert_eq!(AckKind::decode(b"+TERM").expect("term"), AckKind::Term(None));
        assert_eq!(
            AckKind::decode(b"+TERM bad input").expect("term reason"),
            AckKind::Term(Some("bad input".to_string()))
        );
    }

    #[test]
    fn decode_rejects_unknown_verbs() {
        let err = AckKind::decode(b"+MAYBE").expect_err("unknown");
        assert!(matches!(err, Error::InvalidAck(text) if text == "+MAYBE"));
    }

    #[test]
    fn only_progress_is_non_terminal() {
        assert!(AckKind::Ack.is_terminal());
        assert!(AckKind::Nak(None).is_terminal());
        assert!(AckKind::Term(None).is_terminal());
        assert!(!AckKind::Progress.is_terminal());
    }

    #[test]
    fn reply_subject_requires_all_tokens() {
        for subject in [
            "$JS.ACK.ORDERS.worker.1.2.3.4",
            "$JS.ACK.ORDERS.worker.1.2.3.4.5.6",
            "_INBOX.abc",
            "$JS.ACK.ORDERS.worker.x.2.3.4.5",
        ] {
            let err = MessageInfo::from_reply_subject(subject).expect_err("invalid");
            assert!(matches!(err, Error::InvalidReplySubject(_)));
        }
    }
}
