//! The order saga: the bus consumers and command handlers that carry
//! an order from creation through to delivery or cancellation+refund.
//!
//! Every consumer is built from the same shape: a pure `handle_*`
//! function that decodes one payload, mutates its collaborators, and
//! decides [`ConsumeOutcome`], plus a thin `run_*` loop that wires that
//! handler to [`EventBus::subscribe`]/[`EventBus::settle`] via
//! [`run_consumer`]. The handlers are tested directly; the loops are
//! exercised end-to-end against [`order_saga_testing::InMemoryEventBus`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumers;
pub mod error;
pub mod handlers;

pub use error::SagaError;

use futures::StreamExt;
use order_saga_core::event::{Event, SerializedEvent};
use order_saga_core::event_bus::{ConsumeOutcome, EventBus, EventBusError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Encode `event` and publish it to the fanout exchange named by its
/// [`Event::event_type`].
///
/// # Errors
///
/// Returns [`EventBusError`] if encoding or the publish confirm fails.
pub(crate) async fn publish_event<E: Event>(bus: &dyn EventBus, event: &E) -> Result<(), EventBusError> {
    let serialized =
        SerializedEvent::from_event(event).map_err(|error| EventBusError::Transport(error.to_string()))?;
    bus.publish(E::event_type(), serialized).await
}

/// Publish a terminal event and translate the result into the
/// [`ConsumeOutcome`] the caller should settle the delivery with.
pub(crate) async fn publish_terminal<E: Event>(bus: &dyn EventBus, event: &E) -> ConsumeOutcome {
    match publish_event(bus, event).await {
        Ok(()) => ConsumeOutcome::Ack,
        Err(error) => {
            tracing::error!(event_type = E::event_type(), %error, "failed to publish terminal event");
            ConsumeOutcome::RejectNoRequeue
        }
    }
}

/// Subscribe to `queue_name`/`topics` and feed every delivery through
/// `handler`, settling with whatever [`ConsumeOutcome`] it returns.
/// Runs until the bus closes the stream, or until `shutdown` observes
/// `true`. A handler already in flight when shutdown is signalled is
/// always allowed to finish and settle before the loop exits.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run_consumer<F, Fut>(
    bus: Arc<dyn EventBus>,
    queue_name: &str,
    topics: &[&str],
    prefetch: u16,
    mut shutdown: watch::Receiver<bool>,
    mut handler: F,
) -> Result<(), EventBusError>
where
    F: FnMut(SerializedEvent, u32) -> Fut + Send,
    Fut: Future<Output = ConsumeOutcome> + Send,
{
    let mut stream = bus.subscribe(queue_name, topics, prefetch).await?;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!(queue_name, "shutdown observed, exiting consumer loop");
                    break;
                }
            }
            next = stream.next() => {
                let Some(delivery) = next else {
                    tracing::info!(queue_name, "consumer stream closed, loop exiting");
                    break;
                };
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(error) => {
                        tracing::error!(queue_name, %error, "error receiving delivery, skipping");
                        continue;
                    }
                };

                let outcome = handler(delivery.event.clone(), delivery.redelivery_count).await;
                bus.settle(queue_name, delivery, outcome).await?;
            }
        }
    }

    Ok(())
}
