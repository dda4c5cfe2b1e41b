// Server task: subscription handlers feed a bounded queue drained by one task.
use sluice_transport::{
    MessageHandler, SubscriptionEvent, SubscriptionId, Transport, TransportError,
};
use sluice_wire::subjects::ACK_PREFIX;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::store::{Effect, Incoming, Route, StreamStore};
use crate::{Result, ServerError};

enum Command {
    Inbound { route: Route, message: Incoming },
    Closed,
}

/// In-process stream server bound to one transport.
///
/// Dropping the handle stops the server task, which then releases its
/// subscriptions.
pub struct StreamServer {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Subscribe to the admin API and ack subjects and start serving.
    pub fn start(transport: Arc<dyn Transport>, config: ServerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ServerError::NoRuntime)?;
        let (tx, rx) = mpsc::channel(config.command_queue_depth.max(1));
        let api_subject = format!("{}.>", config.api_prefix);
        let api = transport.subscribe(&api_subject, route_handler(tx.clone(), Route::Api))?;
        let ack_subject = format!("{ACK_PREFIX}.>");
        let ack = match transport.subscribe(&ack_subject, route_handler(tx.clone(), Route::Ack)) {
            Ok(id) => id,
            Err(err) => {
                transport.unsubscribe(api);
                return Err(err.into());
            }
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = Worker {
            transport,
            store: StreamStore::new(config.api_prefix.clone()),
            subscriptions: vec![api, ack],
            tx,
        };
        let task = runtime.spawn(worker.run(rx, shutdown_rx, config));
        info!(api = %api_subject, "stream server started");
        Ok(Self {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Stop the server and wait until its subscriptions are released.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "stream server task failed");
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn route_handler(tx: mpsc::Sender<Command>, route: Route) -> MessageHandler {
    Arc::new(move |event| {
        let command = match event {
            SubscriptionEvent::Message(message) => Command::Inbound {
                route: route.clone(),
                message: message.into(),
            },
            SubscriptionEvent::Closed => Command::Closed,
        };
        if let Err(err) = tx.try_send(command) {
            metrics::counter!("sluice_server_commands_dropped_total").increment(1);
            if matches!(err, mpsc::error::TrySendError::Full(_)) {
                warn!(?route, "server queue full, dropping message");
            }
        }
    })
}

struct Worker {
    transport: Arc<dyn Transport>,
    store: StreamStore,
    subscriptions: Vec<SubscriptionId>,
    // Cloned into handlers for stream subscriptions created later.
    tx: mpsc::Sender<Command>,
}

impl Worker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut shutdown: oneshot::Receiver<()>,
        config: ServerConfig,
    ) {
        let mut ticker = tokio::time::interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let effects = tokio::select! {
                _ = &mut shutdown => break,
                command = rx.recv() => match command {
                    Some(Command::Inbound { route, message }) => {
                        self.store.handle(route, message, Instant::now())
                    }
                    Some(Command::Closed) | None => break,
                },
                _ = ticker.tick() => self.store.tick(Instant::now()),
            };
            self.apply(effects);
        }
        for id in self.subscriptions.drain(..) {
            self.transport.unsubscribe(id);
        }
        info!("stream server stopped");
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(message) => {
                    let subject = message.subject.clone();
                    match self.transport.publish(message) {
                        Ok(()) => {}
                        Err(TransportError::Closed) => {
                            debug!(%subject, "dropping reply on closed connection");
                        }
                        Err(err) => warn!(error = %err, %subject, "server publish failed"),
                    }
                }
                Effect::Listen { stream, subject } => {
                    let handler = route_handler(self.tx.clone(), Route::Stream(stream.clone()));
                    match self.transport.subscribe(&subject, handler) {
                        Ok(id) => self.subscriptions.push(id),
                        Err(err) => {
                            warn!(error = %err, %stream, %subject, "stream subscribe failed");
                        }
                    }
                }
            }
        }
    }
}
