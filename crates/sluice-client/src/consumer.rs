// Handle to one pull consumer: cached metadata plus fetch/next.
use anyhow::Result;
use futures::StreamExt;
use parking_lot::Mutex;
use sluice_wire::{ConsumerInfo, PullRequest, subjects};
use std::sync::Arc;
use std::time::Duration;

use crate::admin::StreamAdmin;
use crate::batch::{Batch, BlockingBatch};
use crate::client::Client;
use crate::pull::PullSession;
use crate::{Message, PullError};

/// Largest batch a single pull asks for. Larger `max_messages` values are
/// clamped to it.
pub const MAX_FETCH_BATCH: usize = 1 << 20;

/// Options for one [`Consumer::fetch`]. Unset fields fall back to the
/// consumer's advertised limits and then to [`crate::ClientConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub max_messages: Option<usize>,
    pub max_bytes: Option<usize>,
    pub expires: Option<Duration>,
    pub idle_heartbeat: Option<Duration>,
    pub no_wait: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_messages(mut self, value: usize) -> Self {
        self.max_messages = Some(value);
        self
    }

    pub fn max_bytes(mut self, value: usize) -> Self {
        self.max_bytes = Some(value);
        self
    }

    pub fn expires(mut self, value: Duration) -> Self {
        self.expires = Some(value);
        self
    }

    pub fn idle_heartbeat(mut self, value: Duration) -> Self {
        self.idle_heartbeat = Some(value);
        self
    }

    /// Ask the server to answer immediately instead of waiting for messages.
    pub fn no_wait(mut self, value: bool) -> Self {
        self.no_wait = value;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NextOptions {
    pub expires: Option<Duration>,
}

impl NextOptions {
    pub fn expires(mut self, value: Duration) -> Self {
        self.expires = Some(value);
        self
    }
}

/// A `(stream, consumer)` pair bound to a [`Client`].
///
/// Holds no subscription of its own; every fetch opens and releases its own.
pub struct Consumer {
    client: Client,
    stream: String,
    name: String,
    cached: Mutex<ConsumerInfo>,
}

impl Consumer {
    pub(crate) fn new(client: Client, info: ConsumerInfo) -> Self {
        Self {
            client,
            stream: info.stream_name.clone(),
            name: info.name.clone(),
            cached: Mutex::new(info),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last known consumer info, without a round trip.
    pub fn cached_info(&self) -> ConsumerInfo {
        self.cached.lock().clone()
    }

    /// Consumer info, refreshed from the server when `refresh` is set.
    pub async fn info(&self, refresh: bool) -> Result<ConsumerInfo> {
        if !refresh {
            return Ok(self.cached_info());
        }
        let info = self
            .client
            .admin()
            .get_consumer_info(&self.stream, &self.name)
            .await?;
        *self.cached.lock() = info.clone();
        Ok(info)
    }

    /// Start one pull. Returns as soon as the request is sent; messages arrive
    /// through the returned [`Batch`].
    pub fn fetch(&self, options: FetchOptions) -> Result<Batch, PullError> {
        let request = self.pull_request(&options);
        let subject = subjects::consumer_next(
            &self.client.config().api_prefix,
            &self.stream,
            &self.name,
        );
        let (session, rx) = PullSession::open(
            Arc::clone(self.client.transport()),
            &subject,
            &request,
            self.client.config().expires_grace,
        )?;
        Ok(Batch::new(session, rx))
    }

    /// [`Consumer::fetch`] for synchronous callers.
    pub fn fetch_blocking(&self, options: FetchOptions) -> Result<BlockingBatch, PullError> {
        self.fetch(options).map(Batch::into_blocking)
    }

    /// Pull a single message. `Ok(None)` means nothing arrived before the pull
    /// expired or the server had nothing to deliver.
    pub async fn next(&self, options: NextOptions) -> Result<Option<Message>, PullError> {
        let mut batch = self.fetch(FetchOptions {
            max_messages: Some(1),
            expires: options.expires,
            ..FetchOptions::default()
        })?;
        batch.next().await.transpose()
    }

    /// Remove the consumer on the server.
    pub async fn delete(&self) -> Result<bool> {
        self.client
            .admin()
            .delete_consumer(&self.stream, &self.name)
            .await
    }

    fn pull_request(&self, options: &FetchOptions) -> PullRequest {
        let config = self.client.config();
        let advertised = self.cached.lock().config.max_batch;
        let batch = options
            .max_messages
            .filter(|value| *value > 0)
            .or((advertised > 0).then_some(advertised))
            .unwrap_or(config.default_batch)
            .clamp(1, MAX_FETCH_BATCH);
        let expires = match (options.expires, options.no_wait) {
            (Some(expires), _) => expires,
            (None, true) => Duration::ZERO,
            (None, false) => config.default_expires,
        };
        PullRequest {
            batch,
            max_bytes: options.max_bytes.filter(|value| *value > 0),
            expires,
            idle_heartbeat: options.idle_heartbeat,
            no_wait: options.no_wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientConfig;
    use sluice_transport::LocalConnection;
    use sluice_wire::{ConsumerConfig, SequenceInfo};

    fn consumer(max_batch: usize, config: ClientConfig) -> Consumer {
        let connection = LocalConnection::new().expect("runtime");
        let client = Client::new(connection, config);
        let info = ConsumerInfo {
            stream_name: "ORDERS".to_string(),
            name: "worker".to_string(),
            config: ConsumerConfig {
                max_batch,
                ..ConsumerConfig::durable("worker")
            },
            delivered: SequenceInfo::default(),
            ack_floor: SequenceInfo::default(),
            num_ack_pending: 0,
            num_redelivered: 0,
            num_waiting: 0,
            num_pending: 0,
        };
        Consumer::new(client, info)
    }

    #[tokio::test]
    async fn batch_size_falls_back_to_advertised_then_config() {
        let config = ClientConfig {
            default_batch: 7,
            ..ClientConfig::default()
        };
        let advertised = consumer(25, config.clone());
        assert_eq!(advertised.pull_request(&FetchOptions::new()).batch, 25);
        assert_eq!(
            advertised
                .pull_request(&FetchOptions::new().max_messages(3))
                .batch,
            3
        );

        let unlimited = consumer(0, config);
        assert_eq!(unlimited.pull_request(&FetchOptions::new()).batch, 7);
    }

    #[tokio::test]
    async fn oversized_batch_is_clamped() {
        let consumer = consumer(0, ClientConfig::default());
        let request = consumer.pull_request(&FetchOptions::new().max_messages(usize::MAX));
        assert_eq!(request.batch, MAX_FETCH_BATCH);

        let batch = consumer
            .fetch(
                FetchOptions::new()
                    .max_messages(usize::MAX)
                    .expires(Duration::from_millis(50)),
            )
            .expect("fetch");
        assert!(!batch.is_closed());
    }

    #[tokio::test]
    async fn expires_defaults_from_config_unless_no_wait() {
        let config = ClientConfig {
            default_expires: Duration::from_secs(9),
            ..ClientConfig::default()
        };
        let consumer = consumer(0, config);
        let request = consumer.pull_request(&FetchOptions::new());
        assert_eq!(request.expires, Duration::from_secs(9));
        assert!(!request.no_wait);

        let request = consumer.pull_request(&FetchOptions::new().no_wait(true));
        assert_eq!(request.expires, Duration::ZERO);
        assert!(request.no_wait);

        let request = consumer.pull_request(
            &FetchOptions::new()
                .expires(Duration::from_millis(250))
                .max_bytes(0)
                .idle_heartbeat(Duration::from_millis(50)),
        );
        assert_eq!(request.expires, Duration::from_millis(250));
        assert_eq!(request.max_bytes, None);
        assert_eq!(request.idle_heartbeat, Some(Duration::from_millis(50)));
    }
}
