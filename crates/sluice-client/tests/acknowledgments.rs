mod common;

use common::{Harness, drain, durable};
use sluice_client::{Consumer, FetchOptions, Message, NextOptions};
use sluice_wire::ConsumerConfig;
use std::time::{Duration, Instant};

fn short_ack_wait(ack_wait: Duration) -> ConsumerConfig {
    ConsumerConfig {
        ack_wait,
        ..durable()
    }
}

async fn next_message(consumer: &Consumer) -> Message {
    consumer
        .next(NextOptions::default().expires(Duration::from_secs(2)))
        .await
        .expect("next")
        .expect("message")
}

async fn nothing_due(consumer: &Consumer) -> bool {
    let mut batch = consumer
        .fetch(FetchOptions::new().max_messages(10).no_wait(true))
        .expect("fetch");
    drain(&mut batch).await.is_empty()
}

#[tokio::test]
async fn acked_message_is_not_redelivered() {
    let harness = Harness::start().await;
    let consumer = harness
        .consumer(short_ack_wait(Duration::from_millis(200)))
        .await;
    harness.publish(1).await;

    let message = next_message(&consumer).await;
    message.ack();
    assert!(message.is_acked());
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(nothing_due(&consumer).await);
    let info = consumer.info(true).await.expect("info");
    assert_eq!(info.num_ack_pending, 0);
    assert_eq!(info.ack_floor.stream_seq, 1);
}

#[tokio::test]
async fn nak_redelivers_with_incremented_count() {
    let harness = Harness::start().await;
    let consumer = harness.consumer(durable()).await;
    harness.publish(1).await;

    let first = next_message(&consumer).await;
    assert_eq!(first.info().delivered, 1);
    assert!(!first.redelivered());
    first.nak(None);

    let second = next_message(&consumer).await;
    assert_eq!(second.info().stream_sequence, first.info().stream_sequence);
    assert_eq!(second.info().delivered, 2);
    assert!(second.redelivered());
    assert!(second.info().consumer_sequence > first.info().consumer_sequence);
    second.ack();
}

#[tokio::test]
async fn nak_with_delay_holds_redelivery_back() {
    let harness = Harness::start().await;
    let consumer = harness.consumer(durable()).await;
    harness.publish(1).await;

    let first = next_message(&consumer).await;
    let started = Instant::now();
    first.nak(Some(Duration::from_millis(300)));
    assert!(nothing_due(&consumer).await);

    let second = next_message(&consumer).await;
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(second.info().delivered, 2);
}

#[tokio::test]
async fn unacked_message_comes_back_after_ack_wait() {
    let harness = Harness::start().await;
    let consumer = harness
        .consumer(short_ack_wait(Duration::from_millis(200)))
        .await;
    harness.publish(1).await;

    let first = next_message(&consumer).await;
    drop(first);
    let second = next_message(&consumer).await;
    assert_eq!(second.info().delivered, 2);
    assert_eq!(second.payload().as_ref(), b"order-0");
}

#[tokio::test]
async fn term_stops_redelivery() {
    let harness = Harness::start().await;
    let consumer = harness
        .consumer(short_ack_wait(Duration::from_millis(200)))
        .await;
    harness.publish(1).await;

    let message = next_message(&consumer).await;
    message.term(Some("poison"));
    message.ack();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(nothing_due(&consumer).await);
    let info = consumer.info(true).await.expect("info");
    assert_eq!(info.num_ack_pending, 0);
}

#[tokio::test]
async fn working_postpones_redelivery() {
    let harness = Harness::start().await;
    let consumer = harness
        .consumer(short_ack_wait(Duration::from_millis(300)))
        .await;
    harness.publish(1).await;

    let message = next_message(&consumer).await;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        message.working();
    }
    assert!(!message.is_acked());
    assert!(nothing_due(&consumer).await);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let again = next_message(&consumer).await;
    assert_eq!(again.info().delivered, 2);
}

#[tokio::test]
async fn acking_after_the_pull_ended_still_counts() {
    let harness = Harness::start().await;
    let consumer = harness
        .consumer(short_ack_wait(Duration::from_millis(200)))
        .await;
    harness.publish(3).await;

    let mut batch = consumer
        .fetch(
            FetchOptions::new()
                .max_messages(3)
                .expires(Duration::from_secs(2)),
        )
        .expect("fetch");
    let messages: Vec<Message> = drain(&mut batch)
        .await
        .into_iter()
        .map(|item| item.expect("message"))
        .collect();
    assert!(batch.is_closed());
    drop(batch);

    for message in &messages {
        message.ack();
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(nothing_due(&consumer).await);
}
