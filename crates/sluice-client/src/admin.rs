// Stream admin API: streams, consumers, and consumer metadata.
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sluice_transport::Transport;
use sluice_wire::subjects;
use sluice_wire::{
    ApiResponse, ConsumerConfig, ConsumerInfo, CreateConsumerRequest, DeleteResponse, StreamConfig,
    StreamInfo, validate_name,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::request::request;

/// Server-side management of streams and consumers.
///
/// API failures are returned as [`sluice_wire::ApiError`] inside the
/// `anyhow::Error` and can be recovered with `downcast_ref`.
#[async_trait]
pub trait StreamAdmin: Send + Sync {
    async fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo>;

    async fn stream_info(&self, stream: &str) -> Result<StreamInfo>;

    /// Create a consumer. A `durable_name` makes it durable; otherwise the
    /// server picks an ephemeral name unless `name` is set.
    async fn add_consumer(&self, stream: &str, config: ConsumerConfig) -> Result<ConsumerInfo>;

    async fn get_consumer_info(&self, stream: &str, consumer: &str) -> Result<ConsumerInfo>;

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<bool>;
}

/// [`StreamAdmin`] over transport request/reply.
#[derive(Clone)]
pub struct AdminClient {
    transport: Arc<dyn Transport>,
    api_prefix: String,
    timeout: Duration,
}

impl AdminClient {
    pub fn new(transport: Arc<dyn Transport>, api_prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            api_prefix: api_prefix.into(),
            timeout,
        }
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    async fn call<Req, Resp>(&self, subject: String, body: Option<&Req>) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload = match body {
            Some(body) => Bytes::from(serde_json::to_vec(body).context("encode api request")?),
            None => Bytes::new(),
        };
        debug!(%subject, "admin request");
        let reply = request(self.transport.as_ref(), &subject, payload, self.timeout).await?;
        let response: ApiResponse<Resp> = serde_json::from_slice(&reply)
            .with_context(|| format!("decode api response from {subject}"))?;
        let value = response
            .into_result()
            .with_context(|| format!("api call {subject}"))?;
        Ok(value)
    }
}

#[async_trait]
impl StreamAdmin for AdminClient {
    async fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        validate_name(&config.name)?;
        let subject = subjects::stream_create(&self.api_prefix, &config.name);
        self.call(subject, Some(&config)).await
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamInfo> {
        validate_name(stream)?;
        let subject = subjects::stream_info(&self.api_prefix, stream);
        self.call::<(), _>(subject, None).await
    }

    async fn add_consumer(&self, stream: &str, config: ConsumerConfig) -> Result<ConsumerInfo> {
        validate_name(stream)?;
        if let Some(durable) = &config.durable_name {
            validate_name(durable)?;
        }
        let subject =
            subjects::consumer_create(&self.api_prefix, stream, config.durable_name.as_deref());
        let body = CreateConsumerRequest {
            stream_name: stream.to_string(),
            config,
        };
        self.call(subject, Some(&body)).await
    }

    async fn get_consumer_info(&self, stream: &str, consumer: &str) -> Result<ConsumerInfo> {
        validate_name(stream)?;
        validate_name(consumer)?;
        let subject = subjects::consumer_info(&self.api_prefix, stream, consumer);
        self.call::<(), _>(subject, None).await
    }

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<bool> {
        validate_name(stream)?;
        validate_name(consumer)?;
        let subject = subjects::consumer_delete(&self.api_prefix, stream, consumer);
        let response: DeleteResponse = self.call::<(), _>(subject, None).await?;
        Ok(response.success)
    }
}
