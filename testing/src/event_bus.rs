//! In-memory [`EventBus`] fake: no network, no Kafka, just channels —
//! fast and deterministic for saga consumer tests.

use order_saga_core::event::SerializedEvent;
use order_saga_core::event_bus::{ConsumeOutcome, Delivery, EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::mpsc;

struct Subscription {
    queue_name: String,
    topics: Vec<String>,
    sender: mpsc::Sender<Result<Delivery, EventBusError>>,
}

/// In-memory bus matching [`EventBus`]'s fanout/DLQ/settle semantics
/// without a real broker. Every published event is also appended to an
/// internal log, retrievable with [`InMemoryEventBus::published`], so
/// tests can assert on what a handler emitted.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    published: Mutex<Vec<SerializedEvent>>,
}

impl InMemoryEventBus {
    /// Build an empty bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<SerializedEvent> {
        self.published.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn dlq_topic(queue_name: &str) -> String {
        format!("{queue_name}-dlq")
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.published
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.clone());

            let subscriptions = self.subscriptions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for sub in subscriptions.iter() {
                if !sub.topics.iter().any(|t| t == &topic) {
                    continue;
                }
                let delivery = Delivery {
                    event: event.clone(),
                    redelivery_count: 0,
                    topic: topic.clone(),
                    partition: 0,
                    offset: 0,
                };
                if sub.sender.send(Ok(delivery)).await.is_err() {
                    tracing::debug!(queue_name = %sub.queue_name, "subscriber channel closed, dropping delivery");
                }
            }
            Ok(())
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

        Box::pin(async move {
            let (tx, rx) = mpsc::channel(prefetch.max(1) as usize);
            self.subscriptions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(Subscription { queue_name, topics, sender: tx });

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
                self.publish(&dlq_topic, delivery.event).await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_saga_core::event_bus::EventBus;
    use futures::StreamExt;

    fn event(event_type: &str) -> SerializedEvent {
        SerializedEvent { event_type: event_type.to_string(), data: b"{}".to_vec(), metadata: None }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_published_events() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe("queue-1", &["order.created"], 10).await.unwrap();

        bus.publish("order.created", event("order.created")).await.unwrap();
        bus.publish("order.shipped", event("order.shipped")).await.unwrap();

        let delivered = stream.next().await.unwrap().unwrap();
        assert_eq!(delivered.event.event_type, "order.created");
    }

    #[tokio::test]
    async fn published_log_records_every_publish() {
        let bus = InMemoryEventBus::new();
        bus.publish("order.created", event("order.created")).await.unwrap();
        bus.publish("order.shipped", event("order.shipped")).await.unwrap();
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn reject_no_requeue_forwards_to_companion_dlq() {
        let bus = InMemoryEventBus::new();
        let mut dlq_stream = bus.subscribe("dlq-reader", &["payment-consumer-dlq"], 10).await.unwrap();
        let mut main_stream = bus.subscribe("payment-consumer", &["payment.failed"], 10).await.unwrap();

        bus.publish("payment.failed", event("payment.failed")).await.unwrap();
        let delivery = main_stream.next().await.unwrap().unwrap();

        bus.settle("payment-consumer", delivery, ConsumeOutcome::RejectNoRequeue).await.unwrap();

        let dead_lettered = dlq_stream.next().await.unwrap().unwrap();
        assert_eq!(dead_lettered.event.event_type, "payment.failed");
    }
}
