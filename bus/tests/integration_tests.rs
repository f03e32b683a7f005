//! Integration tests for [`KafkaEventBus`] against a real Kafka instance.
//!
//! Validate publish/subscribe round-trips, manual offset commits via
//! `settle`, and dead-letter routing on reject.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use order_saga_bus::KafkaEventBus;
use order_saga_core::event::SerializedEvent;
use order_saga_core::event_bus::{ConsumeOutcome, EventBus};
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::kafka::{Kafka, KAFKA_PORT};

fn test_event(event_type: &str, data: Vec<u8>) -> SerializedEvent {
    SerializedEvent {
        event_type: event_type.to_string(),
        data,
        metadata: None,
    }
}

async fn wait_for_kafka_ready(bus: &KafkaEventBus) {
    let max_attempts = 30;
    for attempt in 1..=max_attempts {
        let event = test_event("readiness-probe", vec![0]);
        if bus.publish("readiness-probe", event).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != max_attempts, "kafka failed to become ready after {max_attempts} attempts");
    }
}

#[tokio::test]
async fn publish_subscribe_and_ack_round_trip() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("failed to start kafka container");

    let host = kafka.get_host().await.expect("failed to get host");
    let port = kafka.get_host_port_ipv4(KAFKA_PORT).await.expect("failed to get port");
    let brokers = format!("{host}:{port}");

    let bus = KafkaEventBus::connect(&brokers).await.expect("failed to connect");
    wait_for_kafka_ready(&bus).await;

    let mut stream = bus
        .subscribe("order-created-consumer", &["order.created"], 10)
        .await
        .expect("failed to subscribe");

    tokio::time::sleep(Duration::from_millis(500)).await;

    bus.publish("order.created", test_event("order.created", vec![1, 2, 3]))
        .await
        .expect("failed to publish");

    let delivery = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("timed out waiting for delivery")
        .expect("stream ended unexpectedly")
        .expect("delivery decode failed");

    assert_eq!(delivery.event.event_type, "order.created");
    assert_eq!(delivery.event.data, vec![1, 2, 3]);

    bus.settle("order-created-consumer", delivery, ConsumeOutcome::Ack)
        .await
        .expect("settle should commit the offset");
}

#[tokio::test]
async fn rejected_delivery_is_routed_to_companion_dlq() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("failed to start kafka container");

    let host = kafka.get_host().await.expect("failed to get host");
    let port = kafka.get_host_port_ipv4(KAFKA_PORT).await.expect("failed to get port");
    let brokers = format!("{host}:{port}");

    let bus = KafkaEventBus::connect(&brokers).await.expect("failed to connect");
    wait_for_kafka_ready(&bus).await;

    let mut main_stream = bus
        .subscribe("payment-consumer", &["payment.failed"], 10)
        .await
        .expect("failed to subscribe to main queue");
    let mut dlq_stream = bus
        .subscribe("payment-consumer-dlq-reader", &["payment-consumer-dlq"], 10)
        .await
        .expect("failed to subscribe to dlq");

    tokio::time::sleep(Duration::from_millis(500)).await;

    bus.publish("payment.failed", test_event("payment.failed", vec![9, 9]))
        .await
        .expect("failed to publish");

    let delivery = tokio::time::timeout(Duration::from_secs(10), main_stream.next())
        .await
        .expect("timed out waiting for delivery")
        .expect("stream ended unexpectedly")
        .expect("delivery decode failed");

    bus.settle("payment-consumer", delivery, ConsumeOutcome::RejectNoRequeue)
        .await
        .expect("settle should forward to the dlq and commit");

    let dead_lettered = tokio::time::timeout(Duration::from_secs(10), dlq_stream.next())
        .await
        .expect("timed out waiting for dlq delivery")
        .expect("dlq stream ended unexpectedly")
        .expect("dlq delivery decode failed");

    assert_eq!(dead_lettered.event.event_type, "payment.failed");
    assert_eq!(dead_lettered.event.data, vec![9, 9]);
}
