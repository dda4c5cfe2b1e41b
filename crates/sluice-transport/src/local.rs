// In-process connection: subject dispatch, listener registry, tokio-backed timers.
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use slab::Slab;
use sluice_wire::subjects::{self, INBOX_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{
    InboundMessage, MessageHandler, OutboundMessage, Result, SubscriptionEvent, SubscriptionId,
    TimerCallback, TimerId, Transport, TransportError, validate_subject,
};

/// Shared in-process message bus.
///
/// Publishing dispatches synchronously to every matching handler on the
/// publisher's thread. Handlers must not block and must not publish to a
/// subject they themselves match.
///
/// ```
/// use sluice_transport::{LocalConnection, OutboundMessage, SubscriptionEvent, Transport};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let connection = LocalConnection::new().expect("runtime");
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// let id = connection
///     .subscribe("orders.*", Arc::new(move |event| {
///         if let SubscriptionEvent::Message(_) = event {
///             counter.fetch_add(1, Ordering::SeqCst);
///         }
///     }))
///     .expect("subscribe");
/// connection.publish(OutboundMessage::new("orders.eu", "hi")).expect("publish");
/// connection.unsubscribe(id);
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// assert_eq!(connection.listener_count(), 0);
/// # }
/// ```
pub struct LocalConnection {
    runtime: Handle,
    inbox_prefix: String,
    inbox_seq: AtomicU64,
    next_serial: AtomicU64,
    closed: AtomicBool,
    // Read by every publish without locking.
    listeners_snapshot: ArcSwap<Vec<Arc<Listener>>>,
    // Mutated only on subscribe/unsubscribe/close.
    listeners: Mutex<Slab<Arc<Listener>>>,
    timers: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

struct Listener {
    id: SubscriptionId,
    pattern: String,
    handler: MessageHandler,
    // Serializes handler calls for one subscription across publisher threads.
    delivery: Mutex<()>,
}

impl Listener {
    fn deliver(&self, event: SubscriptionEvent) {
        let _delivery = self.delivery.lock();
        (self.handler)(event);
    }
}

impl LocalConnection {
    /// Create a connection bound to the current tokio runtime.
    pub fn new() -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Ok(Self::with_runtime(runtime))
    }

    /// Create a connection whose timers run on `runtime`.
    pub fn with_runtime(runtime: Handle) -> Arc<Self> {
        let inbox_prefix = format!("{INBOX_PREFIX}.{}", uuid::Uuid::new_v4().simple());
        Arc::new(Self {
            runtime,
            inbox_prefix,
            inbox_seq: AtomicU64::new(0),
            next_serial: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            listeners_snapshot: ArcSwap::from_pointee(Vec::new()),
            listeners: Mutex::new(Slab::new()),
            timers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn rebuild_snapshot(&self, listeners: &Slab<Arc<Listener>>) {
        let snapshot: Vec<Arc<Listener>> = listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        metrics::gauge!("sluice_transport_listeners").set(snapshot.len() as f64);
        self.listeners_snapshot.store(Arc::new(snapshot));
    }

    fn record_timer_gauge(timers: &HashMap<u64, JoinHandle<()>>) {
        metrics::gauge!("sluice_transport_timers").set(timers.len() as f64);
    }
}

impl Transport for LocalConnection {
    fn subscribe(&self, subject: &str, handler: MessageHandler) -> Result<SubscriptionId> {
        validate_subject(subject, true)?;
        let mut listeners = self.listeners.lock();
        // Checked under the registry lock so close() cannot miss this listener.
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let entry = listeners.vacant_entry();
        let id = SubscriptionId {
            key: entry.key(),
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
        };
        entry.insert(Arc::new(Listener {
            id,
            pattern: subject.to_string(),
            handler,
            delivery: Mutex::new(()),
        }));
        self.rebuild_snapshot(&listeners);
        trace!(subscription = %id, subject, "subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut listeners = self.listeners.lock();
        let registered = listeners
            .get(id.key)
            .is_some_and(|listener| listener.id == id);
        if registered {
            listeners.remove(id.key);
            self.rebuild_snapshot(&listeners);
            trace!(subscription = %id, "unsubscribed");
        }
    }

    fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        validate_subject(&message.subject, false)?;
        metrics::counter!("sluice_transport_messages_published_total").increment(1);
        let snapshot = self.listeners_snapshot.load_full();
        let mut delivered = 0usize;
        for listener in snapshot
            .iter()
            .filter(|listener| subjects::matches(&listener.pattern, &message.subject))
        {
            delivered += 1;
            listener.deliver(SubscriptionEvent::Message(InboundMessage {
                subscription: listener.id,
                subject: message.subject.clone(),
                reply: message.reply.clone(),
                headers: message.headers.clone(),
                payload: message.payload.clone(),
            }));
        }
        if delivered == 0 {
            metrics::counter!("sluice_transport_messages_undelivered_total").increment(1);
            trace!(subject = %message.subject, "no listener for subject");
        }
        Ok(())
    }

    fn register_timer(&self, after: Duration, callback: TimerCallback) -> Result<TimerId> {
        let mut timers = self.timers.lock();
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let id = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.timers);
        // Inserted before the lock is released, so the task always finds its entry
        // unless cancel_timer removed it first.
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let claimed = {
                let mut timers = registry.lock();
                let claimed = timers.remove(&id).is_some();
                Self::record_timer_gauge(&timers);
                claimed
            };
            if claimed {
                callback();
            }
        });
        timers.insert(id, task);
        Self::record_timer_gauge(&timers);
        Ok(TimerId(id))
    }

    fn cancel_timer(&self, id: TimerId) {
        let task = {
            let mut timers = self.timers.lock();
            let task = timers.remove(&id.0);
            Self::record_timer_gauge(&timers);
            task
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    fn new_inbox(&self) -> String {
        let seq = self.inbox_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}.{seq}", self.inbox_prefix)
    }

    fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn timer_count(&self) -> usize {
        self.timers.lock().len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        let drained: Vec<Arc<Listener>> = {
            let mut listeners = self.listeners.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            let drained = listeners.drain().collect();
            self.rebuild_snapshot(&listeners);
            drained
        };
        let tasks: Vec<JoinHandle<()>> = {
            let mut timers = self.timers.lock();
            let tasks = timers.drain().map(|(_, task)| task).collect();
            Self::record_timer_gauge(&timers);
            tasks
        };
        for task in tasks {
            task.abort();
        }
        debug!(
            listeners = drained.len(),
            inbox = %self.inbox_prefix,
            "local connection closed"
        );
        for listener in drained {
            listener.deliver(SubscriptionEvent::Closed);
        }
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        for (_, task) in self.timers.lock().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn forward(tx: mpsc::UnboundedSender<SubscriptionEvent>) -> MessageHandler {
        Arc::new(move |event| {
            let _ = tx.send(event);
        })
    }

    #[tokio::test]
    async fn publish_reaches_matching_listeners_only() {
        let connection = LocalConnection::new().expect("runtime");
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection
            .subscribe("orders.>", forward(tx.clone()))
            .expect("subscribe");
        connection
            .subscribe("payments.*", forward(tx))
            .expect("subscribe");

        connection
            .publish(OutboundMessage::new("orders.eu.paid", "a").with_reply("reply.to"))
            .expect("publish");
        match rx.recv().await.expect("event") {
            SubscriptionEvent::Message(message) => {
                assert_eq!(message.subject, "orders.eu.paid");
                assert_eq!(message.reply.as_deref(), Some("reply.to"));
                assert_eq!(message.payload, Bytes::from_static(b"a"));
            }
            SubscriptionEvent::Closed => panic!("unexpected close"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_subscription_id_does_not_remove_reused_slot() {
        let connection = LocalConnection::new().expect("runtime");
        let noop: MessageHandler = Arc::new(|_| {});
        let first = connection
            .subscribe("a", Arc::clone(&noop))
            .expect("subscribe");
        connection.unsubscribe(first);
        let second = connection.subscribe("b", noop).expect("subscribe");
        assert_eq!(first.key, second.key);
        connection.unsubscribe(first);
        assert_eq!(connection.listener_count(), 1);
        connection.unsubscribe(second);
        assert_eq!(connection.listener_count(), 0);
    }

    #[tokio::test]
    async fn timers_fire_once_and_unregister() {
        let connection = LocalConnection::new().expect("runtime");
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection
            .register_timer(
                Duration::from_millis(10),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .expect("timer");
        assert_eq!(connection.timer_count(), 1);
        rx.recv().await.expect("fired");
        assert_eq!(connection.timer_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_timers_never_fire() {
        let connection = LocalConnection::new().expect("runtime");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = connection
            .register_timer(
                Duration::from_millis(20),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("timer");
        connection.cancel_timer(id);
        connection.cancel_timer(id);
        assert_eq!(connection.timer_count(), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_notifies_and_rejects_new_work() {
        let connection = LocalConnection::new().expect("runtime");
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.subscribe("a.b", forward(tx)).expect("subscribe");
        connection
            .register_timer(Duration::from_secs(60), Box::new(|| {}))
            .expect("timer");

        connection.close();
        assert_eq!(rx.recv().await.expect("event"), SubscriptionEvent::Closed);
        assert_eq!(connection.listener_count(), 0);
        assert_eq!(connection.timer_count(), 0);
        assert!(connection.is_closed());
        assert_eq!(
            connection.publish(OutboundMessage::new("a.b", "x")),
            Err(TransportError::Closed)
        );
        assert_eq!(
            connection
                .subscribe("a.b", Arc::new(|_| {}))
                .expect_err("closed"),
            TransportError::Closed
        );
    }

    #[tokio::test]
    async fn inboxes_are_unique() {
        let connection = LocalConnection::new().expect("runtime");
        let first = connection.new_inbox();
        let second = connection.new_inbox();
        assert_ne!(first, second);
        assert!(first.starts_with(INBOX_PREFIX));
    }

    #[tokio::test]
    async fn publish_rejects_wildcard_subjects() {
        let connection = LocalConnection::new().expect("runtime");
        assert!(matches!(
            connection.publish(OutboundMessage::new("orders.*", "x")),
            Err(TransportError::InvalidSubject(_))
        ));
    }

    #[test]
    fn new_requires_runtime() {
        assert!(matches!(
            LocalConnection::new(),
            Err(TransportError::NoRuntime)
        ));
    }
}
