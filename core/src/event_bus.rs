//! Event bus abstraction: fanout exchanges, consumer groups with DLQs,
//! publisher confirms, and Ack/Reject-no-requeue consumption.

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by an [`EventBus`] implementation.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The underlying transport connection could not be established.
    #[error("failed to connect to event bus: {0}")]
    ConnectionFailed(String),

    /// A publish did not receive a confirm within the deadline, or was
    /// otherwise rejected by the broker.
    #[error("failed to publish to {topic}: {reason}")]
    PublishFailed {
        /// The topic/exchange the publish targeted.
        topic: String,
        /// Why the publish failed.
        reason: String,
    },

    /// The consumer could not be established for the given topics.
    #[error("failed to subscribe to {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that were requested.
        topics: Vec<String>,
        /// Why the subscription failed.
        reason: String,
    },

    /// Transport-level error with no more specific classification.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A stream of delivered messages, each paired with a [`Delivery`] handle
/// used to Ack or Reject it.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// A single delivered message. Carries enough transport-level position
/// information (`topic`/`partition`/`offset`) for the bus to commit or
/// dead-letter it when [`EventBus::settle`] is called.
pub struct Delivery {
    /// The decoded event envelope.
    pub event: SerializedEvent,
    /// How many times this message has previously been redelivered, if
    /// the transport tracks it.
    pub redelivery_count: u32,
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// The outcome a consumer handler reports for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Processed successfully (or deliberately ignored); commit the
    /// offset / acknowledge the message.
    Ack,
    /// Unprocessable: route to the companion dead-letter queue and do
    /// not redeliver.
    RejectNoRequeue,
}

/// Publish-subscribe abstraction over a durable message bus. Implemented
/// with `dyn`-compatible methods (boxed futures) so it can be held as
/// `Arc<dyn EventBus>` and shared across consumer tasks.
pub trait EventBus: Send + Sync {
    /// Publish a message to the fanout exchange for `topic`, awaiting a
    /// publisher confirm. Implementations must enforce the 5-second
    /// confirm deadline themselves.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the confirm does not
    /// arrive in time or the broker rejects the publish.
    fn publish(
        &self,
        topic: &str,
        event: SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Declare (or attach to) the durable queue `queue_name` bound to
    /// the fanout exchanges named in `topics`, with a companion DLQ, and
    /// return a stream of deliveries bounded by `prefetch` in-flight
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the queue or its
    /// DLQ cannot be declared.
    fn subscribe(
        &self,
        queue_name: &str,
        topics: &[&str],
        prefetch: u16,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;

    /// Settle a delivery taken from the stream returned by `subscribe`
    /// for `queue_name`. `Ack` commits the offset; `RejectNoRequeue`
    /// forwards the original message to `queue_name`'s companion DLQ
    /// topic and then commits the offset so it is not redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Transport`] if the commit or the
    /// dead-letter forward fails.
    fn settle(
        &self,
        queue_name: &str,
        delivery: Delivery,
        outcome: ConsumeOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;
}
