//! Payment Consumer: the simulated payment processor. Draws a random
//! outcome per attempt from a fixed distribution and retries timeouts
//! with exponential backoff before giving up.

use crate::{publish_terminal, run_consumer};
use order_saga_core::event::{PaymentFailed, PaymentProcessed, SerializedEvent, StockReserved};
use order_saga_core::event_bus::{ConsumeOutcome, EventBus, EventBusError};
use order_saga_runtime::retry::RetryPolicy;
use order_saga_store::repository::OrderRepository;
use order_saga_store::StoreError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Consumer group bound to `stock.reserved`.
pub const PAYMENT_QUEUE: &str = "payment-consumer";
/// Prefetch per the bus's channel-per-consumer contract.
pub const PREFETCH: u16 = 10;

/// Orders whose total exceeds this many minor units (10,000 major
/// units) are routed straight to manual fraud review.
const FRAUD_THRESHOLD_MINOR_UNITS: i64 = 10_000 * 100;

/// Attempts before a run of timeouts is given up on as `processor_error`.
const MAX_ATTEMPTS: usize = 3;

fn backoff_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .initial_delay(Duration::from_millis(500))
        .multiplier(2.0)
        .max_delay(Duration::from_secs(4))
        .build()
}

enum SimulatedOutcome {
    Success,
    Timeout,
    Declined,
}

/// Draw one outcome from the fixed distribution: 85% success, 10%
/// timeout, 5% declined.
fn draw_outcome() -> SimulatedOutcome {
    let roll: f64 = rand::thread_rng().gen();
    if roll < 0.85 {
        SimulatedOutcome::Success
    } else if roll < 0.95 {
        SimulatedOutcome::Timeout
    } else {
        SimulatedOutcome::Declined
    }
}

/// Handle one `stock.reserved` message: fraud-check the order's total,
/// then run the simulated payment retry loop to a terminal outcome.
pub async fn handle_stock_reserved(
    event: &SerializedEvent,
    orders: &dyn OrderRepository,
    bus: &dyn EventBus,
) -> ConsumeOutcome {
    let Ok(reserved) = event.decode::<StockReserved>() else {
        tracing::error!(event_type = %event.event_type, "failed to decode stock.reserved payload");
        return ConsumeOutcome::RejectNoRequeue;
    };

    let order = match orders.get(reserved.order_id).await {
        Ok(order) => order,
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(order_id = %reserved.order_id, "stock.reserved for unknown order");
            return ConsumeOutcome::Ack;
        }
        Err(error) => {
            tracing::error!(%error, order_id = %reserved.order_id, "failed to load order for payment");
            return ConsumeOutcome::RejectNoRequeue;
        }
    };

    if order.total_amount.minor_units() > FRAUD_THRESHOLD_MINOR_UNITS {
        let failed = PaymentFailed {
            order_id: reserved.order_id,
            reason: "fraud_verification_required".into(),
        };
        return publish_terminal(bus, &failed).await;
    }

    let policy = backoff_policy();
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        match draw_outcome() {
            SimulatedOutcome::Success => {
                let processed = PaymentProcessed {
                    order_id: reserved.order_id,
                };
                return publish_terminal(bus, &processed).await;
            }
            SimulatedOutcome::Declined => {
                let failed = PaymentFailed {
                    order_id: reserved.order_id,
                    reason: "processor_declined".into(),
                };
                return publish_terminal(bus, &failed).await;
            }
            SimulatedOutcome::Timeout => {
                if attempt >= MAX_ATTEMPTS {
                    let failed = PaymentFailed {
                        order_id: reserved.order_id,
                        reason: "processor_error".into(),
                    };
                    return publish_terminal(bus, &failed).await;
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

/// Run the payment loop until the bus closes the stream.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run(
    bus: Arc<dyn EventBus>,
    orders: Arc<dyn OrderRepository>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), EventBusError> {
    let loop_bus = Arc::clone(&bus);
    run_consumer(bus, PAYMENT_QUEUE, &["stock.reserved"], PREFETCH, shutdown, move |event, _redelivery| {
        let orders = Arc::clone(&orders);
        let bus = Arc::clone(&loop_bus);
        async move { handle_stock_reserved(&event, orders.as_ref(), bus.as_ref()).await }
    })
    .await
}
