//! Refund Consumer: the simulated refund processor. Retries transient
//! timeouts with additive jitter; a declined refund is terminal on the
//! first attempt.

use crate::{publish_event, publish_terminal, run_consumer};
use order_saga_core::event::{OrderCancelled, RefundFailed, RefundProcessed, SerializedEvent, StockReleased};
use order_saga_core::event_bus::{ConsumeOutcome, EventBus, EventBusError};
use order_saga_runtime::jitter::jittered_delay;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Consumer group bound to `order.cancelled`.
pub const REFUND_QUEUE: &str = "refund-consumer";
/// Prefetch per the bus's channel-per-consumer contract.
pub const PREFETCH: u16 = 10;

/// Attempts before a run of timeouts is given up on.
const MAX_ATTEMPTS: u32 = 3;
/// Base delay for the additive-jitter backoff schedule.
const BASE_DELAY: Duration = Duration::from_millis(200);
/// Upper bound of the additive jitter term.
const JITTER_MAX: Duration = Duration::from_millis(100);

enum SimulatedOutcome {
    Success,
    Timeout,
    Declined,
}

/// Draw one outcome from the fixed distribution: 95% success, 3%
/// timeout, 2% declined.
fn draw_outcome() -> SimulatedOutcome {
    let roll: f64 = rand::thread_rng().gen();
    if roll < 0.95 {
        SimulatedOutcome::Success
    } else if roll < 0.98 {
        SimulatedOutcome::Timeout
    } else {
        SimulatedOutcome::Declined
    }
}

/// Handle one `order.cancelled` message: run the simulated refund
/// retry loop to a terminal outcome.
pub async fn handle_order_cancelled(event: &SerializedEvent, bus: &dyn EventBus) -> ConsumeOutcome {
    let Ok(cancelled) = event.decode::<OrderCancelled>() else {
        tracing::error!(event_type = %event.event_type, "failed to decode order.cancelled payload");
        return ConsumeOutcome::RejectNoRequeue;
    };

    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match draw_outcome() {
            SimulatedOutcome::Success => {
                let processed = RefundProcessed {
                    order_id: cancelled.order_id,
                };
                if let Err(error) = publish_event(bus, &processed).await {
                    tracing::error!(%error, order_id = %cancelled.order_id, "failed to publish refund.processed");
                    return ConsumeOutcome::RejectNoRequeue;
                }
                let released = StockReleased {
                    order_id: cancelled.order_id,
                    reason: "refund_processed".into(),
                };
                return publish_terminal(bus, &released).await;
            }
            SimulatedOutcome::Declined => {
                let failed = RefundFailed {
                    order_id: cancelled.order_id,
                    reason: "declined".into(),
                };
                return publish_terminal(bus, &failed).await;
            }
            SimulatedOutcome::Timeout => {
                if attempt >= MAX_ATTEMPTS {
                    let failed = RefundFailed {
                        order_id: cancelled.order_id,
                        reason: "processor_timeout".into(),
                    };
                    return publish_terminal(bus, &failed).await;
                }
                tokio::time::sleep(jittered_delay(BASE_DELAY, attempt, JITTER_MAX)).await;
            }
        }
    }
}

/// Run the refund loop until the bus closes the stream.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run(bus: Arc<dyn EventBus>, shutdown: watch::Receiver<bool>) -> Result<(), EventBusError> {
    let loop_bus = Arc::clone(&bus);
    run_consumer(bus, REFUND_QUEUE, &["order.cancelled"], PREFETCH, shutdown, move |event, _redelivery| {
        let bus = Arc::clone(&loop_bus);
        async move { handle_order_cancelled(&event, bus.as_ref()).await }
    })
    .await
}
