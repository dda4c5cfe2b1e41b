// Pull engine: one bounded pull over one exclusive inbox subscription.
//
// RESOURCE RULES
// --------------
// A session owns exactly one subscription and at most two timers (local expiry
// and heartbeat check). All of them are taken out of `SessionState` in a single
// locked step by `terminate`, then released outside the lock. Whoever reaches
// `terminate` first (message callback, timer, stop, drop, connection close)
// does the release; everyone after that sees `terminal` and returns.
//
// The state lock is never held across a transport call. Callbacks only
// `try_send` into a channel sized to the batch plus one slot for an error, so
// they never block the transport.
use parking_lot::Mutex;
use sluice_transport::{
    InboundMessage, MessageHandler, OutboundMessage, SubscriptionEvent, SubscriptionId, TimerId,
    Transport,
};
use sluice_wire::{Frame, PullRequest, StatusFrame, StatusKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{Message, PullError};

/// Consecutive heartbeat intervals without any server signal before giving up.
const MAX_MISSED_HEARTBEATS: u32 = 2;

pub(crate) type Item = Result<Message, PullError>;

pub(crate) struct PullSession {
    transport: Arc<dyn Transport>,
    inbox: String,
    batch: usize,
    received: AtomicUsize,
    processed: AtomicUsize,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    subscription: Option<SubscriptionId>,
    expiry_timer: Option<TimerId>,
    heartbeat_timer: Option<TimerId>,
    tx: Option<mpsc::Sender<Item>>,
    terminal: bool,
    // Any data or status frame since the last heartbeat check.
    signal_seen: bool,
    missed_heartbeats: u32,
}

/// Registrations taken out of a session that just became terminal.
struct Released {
    subscription: Option<SubscriptionId>,
    timers: [Option<TimerId>; 2],
    tx: Option<mpsc::Sender<Item>>,
}

impl SessionState {
    fn release(&mut self) -> Released {
        self.terminal = true;
        Released {
            subscription: self.subscription.take(),
            timers: [self.expiry_timer.take(), self.heartbeat_timer.take()],
            tx: self.tx.take(),
        }
    }
}

impl PullSession {
    /// Subscribe an inbox, arm timers, and send `request` to `subject`.
    pub(crate) fn open(
        transport: Arc<dyn Transport>,
        subject: &str,
        request: &PullRequest,
        expires_grace: Duration,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Item>), PullError> {
        let inbox = transport.new_inbox();
        let (tx, rx) = mpsc::channel(request.batch.saturating_add(1));
        let session = Arc::new(Self {
            transport: Arc::clone(&transport),
            inbox: inbox.clone(),
            batch: request.batch,
            received: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            state: Mutex::new(SessionState {
                tx: Some(tx),
                ..SessionState::default()
            }),
        });

        let weak = Arc::downgrade(&session);
        let handler: MessageHandler = Arc::new(move |event| {
            if let Some(session) = weak.upgrade() {
                session.on_event(event);
            }
        });
        let subscription = transport.subscribe(&inbox, handler)?;
        session.state.lock().subscription = Some(subscription);
        metrics::counter!("sluice_client_pull_sessions_opened_total").increment(1);

        let started = session
            .arm_timers(request, expires_grace)
            .and_then(|()| session.send_request(subject, request));
        if let Err(err) = started {
            session.close();
            return Err(err);
        }
        debug!(
            inbox = %session.inbox,
            %subject,
            batch = request.batch,
            expires = ?request.expires,
            no_wait = request.no_wait,
            "pull session opened"
        );
        Ok((session, rx))
    }

    pub(crate) fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub(crate) fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.lock().terminal
    }

    /// Release every registration. Safe to call any number of times.
    pub(crate) fn close(&self) {
        self.terminate(None, false);
    }

    fn arm_timers(
        self: &Arc<Self>,
        request: &PullRequest,
        grace: Duration,
    ) -> Result<(), PullError> {
        // With no_wait the server answers immediately; zero expires means the
        // server never gives up either.
        if !request.no_wait && !request.expires.is_zero() {
            let weak = Arc::downgrade(self);
            let id = self.transport.register_timer(
                request.expires + grace,
                Box::new(move || {
                    if let Some(session) = weak.upgrade() {
                        session.on_expired();
                    }
                }),
            )?;
            self.adopt_timer(id, |state| &mut state.expiry_timer);
        }
        if let Some(interval) = request.idle_heartbeat.filter(|interval| !interval.is_zero()) {
            self.schedule_heartbeat_check(interval)?;
        }
        Ok(())
    }

    fn send_request(&self, subject: &str, request: &PullRequest) -> Result<(), PullError> {
        let body = request.encode()?;
        self.transport
            .publish(OutboundMessage::new(subject, body).with_reply(self.inbox.clone()))?;
        Ok(())
    }

    // Store a freshly registered timer, or cancel it if the session ended while
    // it was being registered.
    fn adopt_timer(&self, id: TimerId, slot: fn(&mut SessionState) -> &mut Option<TimerId>) {
        let stale = {
            let mut state = self.state.lock();
            if state.terminal {
                true
            } else {
                *slot(&mut *state) = Some(id);
                false
            }
        };
        if stale {
            self.transport.cancel_timer(id);
        }
    }

    fn schedule_heartbeat_check(self: &Arc<Self>, interval: Duration) -> Result<(), PullError> {
        let weak = Arc::downgrade(self);
        let id = self.transport.register_timer(
            interval,
            Box::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.on_heartbeat_check(interval);
                }
            }),
        )?;
        self.adopt_timer(id, |state| &mut state.heartbeat_timer);
        Ok(())
    }

    fn on_heartbeat_check(self: &Arc<Self>, interval: Duration) {
        let missed = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            state.heartbeat_timer = None;
            if std::mem::take(&mut state.signal_seen) {
                state.missed_heartbeats = 0;
            } else {
                state.missed_heartbeats += 1;
            }
            state.missed_heartbeats
        };
        if missed >= MAX_MISSED_HEARTBEATS {
            metrics::counter!("sluice_client_pull_heartbeats_missed_total").increment(1);
            warn!(inbox = %self.inbox, ?interval, "pull heartbeat missed");
            self.terminate(Some(PullError::HeartbeatMissed), false);
            return;
        }
        if let Err(err) = self.schedule_heartbeat_check(interval) {
            self.terminate(Some(err), false);
        }
    }

    fn on_expired(&self) {
        debug!(
            inbox = %self.inbox,
            received = self.received(),
            "pull expired locally"
        );
        self.terminate(None, false);
    }

    fn on_event(&self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Message(inbound) => self.on_message(inbound),
            SubscriptionEvent::Closed => self.terminate(Some(PullError::Disconnected), false),
        }
    }

    fn on_message(&self, inbound: InboundMessage) {
        let frame = match Frame::classify(inbound.headers.as_ref()) {
            Ok(frame) => frame,
            Err(err) => {
                self.terminate(Some(err.into()), true);
                return;
            }
        };
        match frame {
            Frame::Status(status) => self.on_status(status),
            Frame::Data => match Message::from_delivery(inbound, Arc::clone(&self.transport)) {
                Ok(message) => self.on_data(message),
                Err(err) => self.terminate(Some(err), true),
            },
        }
    }

    fn on_data(&self, message: Message) {
        let released = {
            let mut state = self.state.lock();
            if state.terminal {
                // Unacked; the server redelivers after ack-wait.
                trace!(inbox = %self.inbox, "message after session end dropped");
                return;
            }
            state.signal_seen = true;
            let received = self.received.fetch_add(1, Ordering::SeqCst) + 1;
            if received < self.batch {
                if let Some(tx) = &state.tx
                    && tx.try_send(Ok(message)).is_err()
                {
                    warn!(inbox = %self.inbox, "pull buffer rejected message");
                }
                return;
            }
            state.release()
        };
        // Last message of the batch: release before the caller can see it.
        self.release(released, Some(Ok(message)));
    }

    fn on_status(&self, status: StatusFrame) {
        metrics::counter!("sluice_client_pull_status_frames_total").increment(1);
        trace!(
            inbox = %self.inbox,
            code = status.code,
            description = status.description.as_deref().unwrap_or_default(),
            "status frame"
        );
        if status.kind == StatusKind::IdleHeartbeat {
            self.state.lock().signal_seen = true;
            return;
        }
        let error = if status.is_normal_end() {
            None
        } else if status.kind == StatusKind::ConsumerDeleted {
            Some(PullError::ConsumerDeleted)
        } else {
            Some(PullError::Status {
                code: status.code,
                description: status.description.unwrap_or_default(),
            })
        };
        self.terminate(error, true);
    }

    /// Make the session terminal, optionally counting the frame that ended it
    /// and queueing a final error for the caller.
    fn terminate(&self, error: Option<PullError>, count_frame: bool) {
        let released = {
            let mut state = self.state.lock();
            if state.terminal {
                return;
            }
            if count_frame {
                self.received.fetch_add(1, Ordering::SeqCst);
            }
            state.release()
        };
        self.release(released, error.map(Err));
    }

    fn release(&self, released: Released, last: Option<Item>) {
        if let Some(subscription) = released.subscription {
            self.transport.unsubscribe(subscription);
        }
        for timer in released.timers.into_iter().flatten() {
            self.transport.cancel_timer(timer);
        }
        metrics::counter!("sluice_client_pull_sessions_closed_total").increment(1);
        if let Some(Err(err)) = &last {
            debug!(inbox = %self.inbox, error = %err, "pull session failed");
        } else {
            debug!(
                inbox = %self.inbox,
                received = self.received(),
                "pull session closed"
            );
        }
        if let (Some(tx), Some(item)) = (released.tx, last)
            && tx.try_send(item).is_err()
        {
            trace!(inbox = %self.inbox, "pull receiver gone before final item");
        }
    }
}

impl Drop for PullSession {
    fn drop(&mut self) {
        let released = self.state.get_mut().release();
        if released.subscription.is_some() || released.timers.iter().any(Option::is_some) {
            self.release(released, None);
        }
    }
}
