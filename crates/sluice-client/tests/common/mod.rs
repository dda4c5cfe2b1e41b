#![allow(dead_code)]

use futures::StreamExt;
use sluice_broker::{ServerConfig, StreamServer};
use sluice_client::{Batch, Client, ClientConfig, Consumer, Message, PullError, StreamAdmin};
use sluice_transport::{LocalConnection, Transport};
use sluice_wire::{ConsumerConfig, StreamConfig};
use std::sync::Arc;
use std::time::Duration;

pub const STREAM: &str = "ORDERS";
pub const CONSUMER: &str = "worker";

pub struct Harness {
    pub connection: Arc<LocalConnection>,
    pub server: StreamServer,
    pub client: Client,
}

impl Harness {
    pub async fn start() -> Self {
        let connection = LocalConnection::new().expect("runtime");
        let server =
            StreamServer::start(connection.clone(), ServerConfig::default()).expect("server");
        let client = Client::new(connection.clone(), ClientConfig::default());
        client
            .admin()
            .add_stream(StreamConfig::new(STREAM, vec!["orders.>".to_string()]))
            .await
            .expect("stream");
        Self {
            connection,
            server,
            client,
        }
    }

    pub async fn consumer(&self, config: ConsumerConfig) -> Consumer {
        let info = self
            .client
            .admin()
            .add_consumer(STREAM, config)
            .await
            .expect("add consumer");
        self.client
            .consumer(STREAM, &info.name)
            .await
            .expect("consumer")
    }

    pub async fn publish(&self, count: usize) {
        for index in 0..count {
            self.client
                .publish("orders.new", format!("order-{index}"))
                .await
                .expect("publish");
        }
    }

    /// Listener and timer registrations on the connection.
    pub fn registrations(&self) -> (usize, usize) {
        (
            self.connection.listener_count(),
            self.connection.timer_count(),
        )
    }
}

pub fn durable() -> ConsumerConfig {
    ConsumerConfig::durable(CONSUMER)
}

/// Drain a batch, bounded so a stuck pull fails the test instead of hanging.
pub async fn drain(batch: &mut Batch) -> Vec<Result<Message, PullError>> {
    tokio::time::timeout(Duration::from_secs(10), batch.by_ref().collect::<Vec<_>>())
        .await
        .expect("batch finished")
}

pub fn assert_counters(batch: &Batch, max_messages: usize) {
    assert!(batch.processed() <= batch.received());
    assert!(batch.received() <= max_messages);
}
