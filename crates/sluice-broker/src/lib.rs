// In-process stream server speaking the pull-consumer protocol.
//
// Streams capture published messages; consumers track what each reader has been
// delivered and acknowledged; pull requests wait for messages and end with the
// status frames clients rely on (404, 408, 409, idle heartbeats).
pub mod config;
mod server;
mod store;

pub use config::ServerConfig;
pub use server::StreamServer;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("transport error")]
    Transport(#[from] sluice_transport::TransportError),
    #[error("no async runtime available to run the server task")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sluice_transport::{LocalConnection, OutboundMessage, SubscriptionEvent, Transport};
    use sluice_wire::{ApiResponse, PubAck, StreamConfig, StreamInfo};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn request(
        connection: &Arc<LocalConnection>,
        subject: &str,
        payload: Vec<u8>,
    ) -> Bytes {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inbox = connection.new_inbox();
        let id = connection
            .subscribe(
                &inbox,
                Arc::new(move |event| {
                    if let SubscriptionEvent::Message(message) = event {
                        let _ = tx.send(message.payload);
                    }
                }),
            )
            .expect("subscribe");
        connection
            .publish(OutboundMessage::new(subject, payload).with_reply(inbox))
            .expect("publish");
        let body = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("reply in time")
            .expect("reply");
        connection.unsubscribe(id);
        body
    }

    #[tokio::test]
    async fn serves_stream_creation_and_publish_over_transport() {
        let connection = LocalConnection::new().expect("runtime");
        let server =
            StreamServer::start(connection.clone(), ServerConfig::default()).expect("start");

        let body = serde_json::to_vec(&StreamConfig::new("ORDERS", vec!["orders.>".into()]))
            .expect("encode");
        let reply = request(&connection, "$JS.API.STREAM.CREATE.ORDERS", body).await;
        let info: ApiResponse<StreamInfo> = serde_json::from_slice(&reply).expect("decode");
        assert_eq!(info.into_result().expect("stream").config.name, "ORDERS");

        let reply = request(&connection, "orders.eu", b"hello".to_vec()).await;
        let ack: ApiResponse<PubAck> = serde_json::from_slice(&reply).expect("decode");
        assert_eq!(ack.into_result().expect("pub ack").seq, 1);

        server.shutdown().await;
        assert_eq!(connection.listener_count(), 0);
    }

    #[tokio::test]
    async fn server_stops_when_connection_closes() {
        let connection = LocalConnection::new().expect("runtime");
        let server =
            StreamServer::start(connection.clone(), ServerConfig::default()).expect("start");
        assert_eq!(connection.listener_count(), 2);
        connection.close();
        tokio::time::timeout(Duration::from_secs(1), server.shutdown())
            .await
            .expect("server stopped");
    }

    #[test]
    fn start_requires_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        let connection = LocalConnection::with_runtime(runtime.handle().clone());
        let result = StreamServer::start(connection, ServerConfig::default());
        assert!(matches!(result, Err(ServerError::NoRuntime)));
    }
}
