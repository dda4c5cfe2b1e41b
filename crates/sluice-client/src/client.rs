// Connection-scoped entry point: admin API, publishing, and consumer handles.
use anyhow::{Context, Result};
use bytes::Bytes;
use sluice_transport::Transport;
use sluice_wire::{ApiResponse, PubAck};
use std::sync::Arc;
use tracing::debug;

use crate::admin::{AdminClient, StreamAdmin};
use crate::config::ClientConfig;
use crate::consumer::Consumer;
use crate::request::request;

/// Cheap to clone; clones share the transport and configuration.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    admin: AdminClient,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let admin = AdminClient::new(
            Arc::clone(&transport),
            config.api_prefix.clone(),
            config.request_timeout,
        );
        Self {
            transport,
            config: Arc::new(config),
            admin,
        }
    }

    pub fn admin(&self) -> &AdminClient {
        &self.admin
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Publish to a stream subject and wait for the stream's acknowledgment.
    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<PubAck> {
        let reply = request(
            self.transport.as_ref(),
            subject,
            payload.into(),
            self.config.request_timeout,
        )
        .await?;
        let response: ApiResponse<PubAck> =
            serde_json::from_slice(&reply).context("decode publish ack")?;
        let ack = response
            .into_result()
            .with_context(|| format!("publish to {subject}"))?;
        debug!(%subject, stream = %ack.stream, seq = ack.seq, "published");
        Ok(ack)
    }

    /// Bind to an existing consumer. Its info is fetched once and cached.
    pub async fn consumer(&self, stream: &str, name: &str) -> Result<Consumer> {
        let info = self.admin.get_consumer_info(stream, name).await?;
        Ok(Consumer::new(self.clone(), info))
    }
}
