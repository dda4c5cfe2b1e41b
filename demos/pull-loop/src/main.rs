// Pull-loop demo: in-process server, a durable consumer, and a fetch/ack loop.
use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use sluice_broker::{ServerConfig, StreamServer};
use sluice_client::{Client, ClientConfig, FetchOptions, PullError, StreamAdmin};
use sluice_transport::{LocalConnection, Transport};
use sluice_wire::{ConsumerConfig, StreamConfig};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pull-loop")]
#[command(about = "Publish to an in-process stream and drain it with bounded pulls")]
struct Args {
    /// Stream name
    #[arg(long, default_value = "ORDERS")]
    stream: String,

    /// Durable consumer name
    #[arg(long, default_value = "worker")]
    consumer: String,

    /// Messages to publish before draining
    #[arg(long, default_value = "250")]
    messages: usize,

    /// Messages per pull
    #[arg(long, default_value = "100")]
    batch: usize,

    /// Pull expiry in milliseconds
    #[arg(long, default_value = "500")]
    expires_ms: u64,

    /// Idle heartbeat in milliseconds (0 = disabled)
    #[arg(long, default_value = "0")]
    heartbeat_ms: u64,

    /// Negatively acknowledge every Nth message once (0 = never)
    #[arg(long, default_value = "0")]
    nak_every: u64,

    /// Optional client config YAML
    #[arg(long, env = "SLUICE_CLIENT_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let client_config = ClientConfig::from_env_or_yaml(args.config.as_deref())?;
    let server_config = ServerConfig::from_env_or_yaml(None)?;

    let connection = LocalConnection::new().context("create connection")?;
    let server = StreamServer::start(connection.clone(), server_config)
        .context("start stream server")?;
    let client = Client::new(connection.clone(), client_config);

    let subject_root = args.stream.to_lowercase();
    client
        .admin()
        .add_stream(StreamConfig::new(
            args.stream.clone(),
            vec![format!("{subject_root}.>")],
        ))
        .await?;
    client
        .admin()
        .add_consumer(&args.stream, ConsumerConfig::durable(args.consumer.clone()))
        .await?;
    let consumer = client.consumer(&args.stream, &args.consumer).await?;
    info!(stream = %args.stream, consumer = %args.consumer, "consumer ready");

    for index in 0..args.messages {
        client
            .publish(&format!("{subject_root}.created"), format!("message-{index}"))
            .await?;
    }
    info!(count = args.messages, "published");

    let started = Instant::now();
    let mut acked = 0usize;
    let mut pulls = 0usize;
    loop {
        let mut options = FetchOptions::new()
            .max_messages(args.batch)
            .expires(Duration::from_millis(args.expires_ms));
        if args.heartbeat_ms > 0 {
            options = options.idle_heartbeat(Duration::from_millis(args.heartbeat_ms));
        }
        let mut batch = consumer.fetch(options)?;
        pulls += 1;
        let mut yielded = 0usize;
        while let Some(item) = batch.next().await {
            match item {
                Ok(message) => {
                    yielded += 1;
                    let seq = message.info().stream_sequence;
                    if args.nak_every > 0 && seq % args.nak_every == 0 && !message.redelivered() {
                        message.nak(None);
                        continue;
                    }
                    message.ack();
                    acked += 1;
                }
                Err(PullError::HeartbeatMissed) => {
                    warn!("server went quiet; pulling again");
                }
                Err(err) => return Err(err).context("pull failed"),
            }
        }
        info!(
            pull = pulls,
            yielded,
            received = batch.received(),
            "pull finished"
        );
        if yielded == 0 {
            break;
        }
    }

    let info = consumer.info(true).await?;
    info!(
        acked,
        pulls,
        elapsed_ms = started.elapsed().as_millis() as u64,
        ack_pending = info.num_ack_pending,
        pending = info.num_pending,
        listeners = connection.listener_count(),
        timers = connection.timer_count(),
        "drained"
    );

    server.shutdown().await;
    connection.close();
    Ok(())
}
