// Request/reply over a throwaway inbox subscription.
use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use sluice_transport::{
    MessageHandler, OutboundMessage, SubscriptionEvent, SubscriptionId, Transport, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// Unsubscribes the reply inbox on every exit path.
struct InboxGuard<'a> {
    transport: &'a dyn Transport,
    subscription: SubscriptionId,
}

impl Drop for InboxGuard<'_> {
    fn drop(&mut self) {
        self.transport.unsubscribe(self.subscription);
    }
}

/// Publish `payload` to `subject` and wait for the first reply.
pub(crate) async fn request(
    transport: &dyn Transport,
    subject: &str,
    payload: Bytes,
    timeout: Duration,
) -> Result<Bytes> {
    let inbox = transport.new_inbox();
    // `None` marks a connection close.
    let (tx, mut rx) = mpsc::channel::<Option<Bytes>>(1);
    let handler: MessageHandler = Arc::new(move |event| {
        let reply = match event {
            SubscriptionEvent::Message(message) => Some(message.payload),
            SubscriptionEvent::Closed => None,
        };
        let _ = tx.try_send(reply);
    });
    let subscription = transport
        .subscribe(&inbox, handler)
        .context("subscribe reply inbox")?;
    let _guard = InboxGuard {
        transport,
        subscription,
    };
    transport
        .publish(OutboundMessage::new(subject, payload).with_reply(inbox))
        .with_context(|| format!("publish request to {subject}"))?;
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(Some(body))) => Ok(body),
        Ok(Some(None) | None) => {
            Err(anyhow!(TransportError::Closed)).with_context(|| format!("request to {subject}"))
        }
        Err(_) => bail!("request to {subject} timed out after {timeout:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_transport::LocalConnection;

    #[tokio::test]
    async fn times_out_without_responder_and_cleans_up() {
        let connection = LocalConnection::new().expect("runtime");
        let err = request(
            connection.as_ref(),
            "nobody.home",
            Bytes::new(),
            Duration::from_millis(20),
        )
        .await
        .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
        assert_eq!(connection.listener_count(), 0);
    }

    #[tokio::test]
    async fn returns_first_reply() {
        let connection = LocalConnection::new().expect("runtime");
        let responder = connection.clone();
        connection
            .subscribe(
                "echo",
                Arc::new(move |event| {
                    if let SubscriptionEvent::Message(message) = event
                        && let Some(reply) = message.reply
                    {
                        let _ = responder.publish(OutboundMessage::new(reply, message.payload));
                    }
                }),
            )
            .expect("subscribe");
        let body = request(
            connection.as_ref(),
            "echo",
            Bytes::from_static(b"ping"),
            Duration::from_secs(1),
        )
        .await
        .expect("reply");
        assert_eq!(body, Bytes::from_static(b"ping"));
        assert_eq!(connection.listener_count(), 1);
    }
}
