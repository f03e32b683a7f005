//! Kafka-backed event bus for the order saga.
//!
//! Maps the AMQP concepts the saga is specified against onto `rdkafka`:
//!
//! - A **fanout exchange** (`order.created`, `stock.reserved`, ...) is a
//!   Kafka topic of the same name.
//! - A **durable queue** bound to one or more exchanges is a consumer
//!   group (`queue_name`) subscribed to those topics.
//! - A queue's **dead-letter queue** is a companion topic named
//!   `{queue_name}-dlq`; [`EventBus::settle`] forwards rejected
//!   deliveries there before committing the original offset.
//! - **Publisher confirms** are the producer's delivery report, awaited
//!   with a 5-second deadline.
//! - **Prefetch** bounds the channel between the Kafka consumer task and
//!   the subscriber, the same way a channel's unacked-message limit
//!   bounds an AMQP consumer.
//!
//! Bodies are JSON (the whole [`SerializedEvent`] envelope, not just its
//! inner payload), matching the wire protocol the rest of the saga uses.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use dashmap::DashMap;
use order_saga_core::event::SerializedEvent;
use order_saga_core::event_bus::{ConsumeOutcome, Delivery, EventBus, EventBusError, EventStream};
use order_saga_runtime::retry::{retry_with_backoff, RetryPolicy};
use order_saga_store::DeadLetterQueue;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Suffix appended to a queue name to derive its dead-letter topic.
const DLQ_SUFFIX: &str = "-dlq";

/// Reconnect backoff: starts at 2s, doubles, caps at 30s.
fn reconnect_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(usize::MAX)
        .initial_delay(Duration::from_secs(2))
        .max_delay(Duration::from_secs(30))
        .multiplier(2.0)
        .build()
}

/// Kafka-backed [`EventBus`] implementation.
pub struct KafkaEventBus {
    producer: FutureProducer,
    brokers: String,
    confirm_timeout: Duration,
    consumers: DashMap<String, Arc<StreamConsumer>>,
    dead_letter_queue: Option<Arc<DeadLetterQueue>>,
}

impl KafkaEventBus {
    /// Connect to `brokers`, retrying with exponential backoff
    /// (2s, capped at 30s) until the producer can be created.
    ///
    /// # Errors
    ///
    /// This only returns `Err` if retries are exhausted, which cannot
    /// happen with the unbounded policy used here; kept fallible to
    /// leave room for a bounded policy in the future.
    pub async fn connect(brokers: &str) -> Result<Self, EventBusError> {
        let producer = retry_with_backoff(reconnect_policy(), || async {
            ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .set("acks", "all")
                .create::<FutureProducer>()
                .map_err(|e| format!("failed to create producer: {e}"))
        })
        .await
        .map_err(EventBusError::ConnectionFailed)?;

        tracing::info!(brokers, "connected to kafka");

        Ok(Self {
            producer,
            brokers: brokers.to_string(),
            confirm_timeout: Duration::from_secs(5),
            consumers: DashMap::new(),
            dead_letter_queue: None,
        })
    }

    /// Record every `RejectNoRequeue` settle onto `dead_letter_queue` in
    /// addition to routing it to the bus-level companion DLQ topic,
    /// so a rejected delivery is both replayable from Kafka and
    /// queryable/resolvable from Postgres.
    #[must_use]
    pub fn with_dead_letter_queue(mut self, dead_letter_queue: Arc<DeadLetterQueue>) -> Self {
        self.dead_letter_queue = Some(dead_letter_queue);
        self
    }

    fn dlq_topic(queue_name: &str) -> String {
        format!("{queue_name}{DLQ_SUFFIX}")
    }
}

impl EventBus for KafkaEventBus {
    fn publish(
        &self,
        topic: &str,
        event: SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let timeout = self.confirm_timeout;

        Box::pin(async move {
            let payload = serde_json::to_vec(&event).map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: format!("failed to encode event: {e}"),
            })?;

            let key = event.event_type.as_bytes();
            let record = FutureRecord::to(&topic).payload(&payload).key(key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic,
                        partition,
                        offset,
                        event_type = %event.event_type,
                        "published event, confirm received"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic, error = %kafka_error, "publish confirm not received");
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        queue_name: &str,
        topics: &[&str],
        prefetch: u16,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let queue_name = queue_name.to_string();
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &queue_name)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set("session.timeout.ms", "6000")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(|e| EventBusError::SubscriptionFailed {
                topics: topics.clone(),
                reason: format!("failed to subscribe: {e}"),
            })?;

            tracing::info!(queue_name, ?topics, prefetch, "subscribed, manual commit enabled");

            let consumer = Arc::new(consumer);
            self.consumers.insert(queue_name.clone(), Arc::clone(&consumer));

            let (tx, rx) = tokio::sync::mpsc::channel(prefetch as usize);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                while let Some(msg_result) = stream.next().await {
                    let delivery = match msg_result {
                        Ok(message) => {
                            let data = message.payload().unwrap_or_default().to_vec();
                            match serde_json::from_slice::<SerializedEvent>(&data) {
                                Ok(event) => Ok(Delivery {
                                    event,
                                    redelivery_count: 0,
                                    topic: message.topic().to_string(),
                                    partition: message.partition(),
                                    offset: message.offset(),
                                }),
                                Err(e) => Err(EventBusError::Transport(format!(
                                    "failed to decode message body: {e}"
                                ))),
                            }
                        }
                        Err(e) => Err(EventBusError::Transport(format!("kafka stream error: {e}"))),
                    };

                    if tx.send(delivery).await.is_err() {
                        tracing::debug!(queue_name, "subscriber dropped, exiting consumer task");
                        break;
                    }
                }
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn settle(
        &self,
        queue_name: &str,
        delivery: Delivery,
        outcome: ConsumeOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let queue_name = queue_name.to_string();

        Box::pin(async move {
            if outcome == ConsumeOutcome::RejectNoRequeue {
                let dlq_topic = Self::dlq_topic(&queue_name);
                self.publish(&dlq_topic, delivery.event.clone()).await.map_err(|e| {
                    EventBusError::Transport(format!("failed to forward to dlq {dlq_topic}: {e}"))
                })?;
                tracing::warn!(queue_name, dlq_topic, event_type = %delivery.event.event_type, "rejected delivery routed to dlq");

                if let Some(dead_letter_queue) = &self.dead_letter_queue {
                    let reason = format!("rejected by {queue_name} handler (no requeue)");
                    if let Err(error) = dead_letter_queue
                        .add_entry(&queue_name, &delivery.event, &reason, i32::try_from(delivery.redelivery_count).unwrap_or(i32::MAX))
                        .await
                    {
                        tracing::error!(queue_name, %error, "failed to record rejected delivery in postgres dlq");
                    }
                }
            }

            let consumer = self.consumers.get(&queue_name).ok_or_else(|| {
                EventBusError::Transport(format!("no active consumer registered for queue {queue_name}"))
            })?;

            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&delivery.topic, delivery.partition, Offset::Offset(delivery.offset + 1))
                .map_err(|e| EventBusError::Transport(format!("failed to build offset commit: {e}")))?;

            consumer.commit(&tpl, CommitMode::Async).map_err(|e| {
                EventBusError::Transport(format!("failed to commit offset: {e}"))
            })?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<KafkaEventBus>();
        assert_sync::<KafkaEventBus>();
    }

    #[test]
    fn dlq_topic_appends_suffix() {
        assert_eq!(KafkaEventBus::dlq_topic("reservation-consumer"), "reservation-consumer-dlq");
    }
}
