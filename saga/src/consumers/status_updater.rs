//! Status Updater Consumer: three independent, idempotent
//! subscriptions that mutate the order aggregate in response to
//! payment and reservation outcomes.

use crate::{publish_terminal, run_consumer};
use order_saga_core::environment::Clock;
use order_saga_core::event::{PaymentFailed, PaymentProcessed, SerializedEvent, StockFailed, StockReleased};
use order_saga_core::event_bus::{ConsumeOutcome, EventBus, EventBusError};
use order_saga_core::order::OrderStatus;
use order_saga_store::repository::OrderRepository;
use order_saga_store::StoreError;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Consumer group bound to `payment.processed`.
pub const PAYMENT_PROCESSED_QUEUE: &str = "status-updater.payment-processed";
/// Consumer group bound to `payment.failed`.
pub const PAYMENT_FAILED_QUEUE: &str = "status-updater.payment-failed";
/// Consumer group bound to `stock.failed`.
pub const STOCK_FAILED_QUEUE: &str = "status-updater.stock-failed";
/// Prefetch per the bus's channel-per-consumer contract.
pub const PREFETCH: u16 = 10;

async fn load_order_tolerantly(
    orders: &dyn OrderRepository,
    order_id: Uuid,
    event_type: &str,
) -> Result<Option<order_saga_core::order::Order>, ()> {
    match orders.get(order_id).await {
        Ok(order) => Ok(Some(order)),
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(%order_id, event_type, "status update for unknown order, acking");
            Ok(None)
        }
        Err(error) => {
            tracing::error!(%error, %order_id, event_type, "failed to load order");
            Err(())
        }
    }
}

/// `payment.processed` → confirm the order unless it is already
/// `Confirmed`.
pub async fn handle_payment_processed(
    event: &SerializedEvent,
    orders: &dyn OrderRepository,
    clock: &dyn Clock,
) -> ConsumeOutcome {
    let Ok(payload) = event.decode::<PaymentProcessed>() else {
        tracing::error!(event_type = %event.event_type, "failed to decode payment.processed payload");
        return ConsumeOutcome::RejectNoRequeue;
    };

    let Ok(maybe_order) = load_order_tolerantly(orders, payload.order_id, "payment.processed").await else {
        return ConsumeOutcome::RejectNoRequeue;
    };
    let Some(mut order) = maybe_order else {
        return ConsumeOutcome::Ack;
    };

    if order.status == OrderStatus::Confirmed {
        return ConsumeOutcome::Ack;
    }

    if let Err(error) = order.confirm(clock) {
        tracing::error!(%error, order_id = %order.id, "cannot confirm order");
        return ConsumeOutcome::RejectNoRequeue;
    }

    match orders.update(&order).await {
        Ok(()) => ConsumeOutcome::Ack,
        Err(error) => {
            tracing::error!(%error, order_id = %order.id, "failed to persist confirmation");
            ConsumeOutcome::RejectNoRequeue
        }
    }
}

/// `payment.failed` → cancel the order unless already `Cancelled`,
/// then request its reservations be released.
pub async fn handle_payment_failed(
    event: &SerializedEvent,
    orders: &dyn OrderRepository,
    bus: &dyn EventBus,
    clock: &dyn Clock,
) -> ConsumeOutcome {
    let Ok(payload) = event.decode::<PaymentFailed>() else {
        tracing::error!(event_type = %event.event_type, "failed to decode payment.failed payload");
        return ConsumeOutcome::RejectNoRequeue;
    };

    let Ok(maybe_order) = load_order_tolerantly(orders, payload.order_id, "payment.failed").await else {
        return ConsumeOutcome::RejectNoRequeue;
    };
    let Some(mut order) = maybe_order else {
        return ConsumeOutcome::Ack;
    };

    if order.status == OrderStatus::Cancelled {
        return ConsumeOutcome::Ack;
    }

    if let Err(error) = order.cancel("payment_failed".into(), clock) {
        tracing::error!(%error, order_id = %order.id, "cannot cancel order after payment failure");
        return ConsumeOutcome::RejectNoRequeue;
    }

    if let Err(error) = orders.update(&order).await {
        tracing::error!(%error, order_id = %order.id, "failed to persist cancellation");
        return ConsumeOutcome::RejectNoRequeue;
    }

    let released = StockReleased {
        order_id: order.id,
        reason: "payment_failed".into(),
    };
    publish_terminal(bus, &released).await
}

/// `stock.failed` → cancel the order unless it already reached a
/// terminal or confirmed state.
pub async fn handle_stock_failed(
    event: &SerializedEvent,
    orders: &dyn OrderRepository,
    clock: &dyn Clock,
) -> ConsumeOutcome {
    let Ok(payload) = event.decode::<StockFailed>() else {
        tracing::error!(event_type = %event.event_type, "failed to decode stock.failed payload");
        return ConsumeOutcome::RejectNoRequeue;
    };

    let Ok(maybe_order) = load_order_tolerantly(orders, payload.order_id, "stock.failed").await else {
        return ConsumeOutcome::RejectNoRequeue;
    };
    let Some(mut order) = maybe_order else {
        return ConsumeOutcome::Ack;
    };

    if matches!(order.status, OrderStatus::Confirmed | OrderStatus::Cancelled) {
        return ConsumeOutcome::Ack;
    }

    if let Err(error) = order.cancel("inventory_failed".into(), clock) {
        tracing::error!(%error, order_id = %order.id, "cannot cancel order after stock failure");
        return ConsumeOutcome::RejectNoRequeue;
    }

    match orders.update(&order).await {
        Ok(()) => ConsumeOutcome::Ack,
        Err(error) => {
            tracing::error!(%error, order_id = %order.id, "failed to persist cancellation");
            ConsumeOutcome::RejectNoRequeue
        }
    }
}

/// Run the `payment.processed` loop until the bus closes the stream.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run_payment_processed(
    bus: Arc<dyn EventBus>,
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), EventBusError> {
    run_consumer(bus, PAYMENT_PROCESSED_QUEUE, &["payment.processed"], PREFETCH, shutdown, move |event, _redelivery| {
        let orders = Arc::clone(&orders);
        let clock = Arc::clone(&clock);
        async move { handle_payment_processed(&event, orders.as_ref(), clock.as_ref()).await }
    })
    .await
}

/// Run the `payment.failed` loop until the bus closes the stream.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run_payment_failed(
    bus: Arc<dyn EventBus>,
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), EventBusError> {
    let loop_bus = Arc::clone(&bus);
    run_consumer(bus, PAYMENT_FAILED_QUEUE, &["payment.failed"], PREFETCH, shutdown, move |event, _redelivery| {
        let orders = Arc::clone(&orders);
        let bus = Arc::clone(&loop_bus);
        let clock = Arc::clone(&clock);
        async move { handle_payment_failed(&event, orders.as_ref(), bus.as_ref(), clock.as_ref()).await }
    })
    .await
}

/// Run the `stock.failed` loop until the bus closes the stream.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run_stock_failed(
    bus: Arc<dyn EventBus>,
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), EventBusError> {
    run_consumer(bus, STOCK_FAILED_QUEUE, &["stock.failed"], PREFETCH, shutdown, move |event, _redelivery| {
        let orders = Arc::clone(&orders);
        let clock = Arc::clone(&clock);
        async move { handle_stock_failed(&event, orders.as_ref(), clock.as_ref()).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_saga_core::environment::FixedClock;
    use order_saga_core::event::SerializedEvent;
    use order_saga_core::money::Money;
    use order_saga_core::order::Order;
    use order_saga_testing::{InMemoryEventBus, InMemoryOrderStore};

    async fn confirmable_order(orders: &InMemoryOrderStore, clock: &FixedClock) -> Order {
        let order = Order::create(
            "cust-a".into(),
            vec![("widget".into(), 2, Money::from_minor_units(6_000, "TRY"))],
            clock,
        )
        .unwrap();
        orders.create(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn payment_processed_confirms_pending_order() {
        let orders = InMemoryOrderStore::new();
        let clock = FixedClock::at_epoch();
        let order = confirmable_order(&orders, &clock).await;

        let event = SerializedEvent::from_event(&PaymentProcessed { order_id: order.id }).unwrap();
        let outcome = handle_payment_processed(&event, &orders, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
        assert_eq!(orders.get(order.id).await.unwrap().status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn payment_processed_is_a_no_op_when_already_confirmed() {
        let orders = InMemoryOrderStore::new();
        let clock = FixedClock::at_epoch();
        let mut order = confirmable_order(&orders, &clock).await;
        order.confirm(&clock).unwrap();
        orders.update(&order).await.unwrap();

        let event = SerializedEvent::from_event(&PaymentProcessed { order_id: order.id }).unwrap();
        let outcome = handle_payment_processed(&event, &orders, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
    }

    #[tokio::test]
    async fn payment_failed_cancels_order_and_emits_stock_released() {
        let orders = InMemoryOrderStore::new();
        let bus = InMemoryEventBus::new();
        let clock = FixedClock::at_epoch();
        let order = confirmable_order(&orders, &clock).await;

        let event = SerializedEvent::from_event(&PaymentFailed {
            order_id: order.id,
            reason: "processor_error".into(),
        })
        .unwrap();
        let outcome = handle_payment_failed(&event, &orders, &bus, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
        assert_eq!(orders.get(order.id).await.unwrap().status, OrderStatus::Cancelled);
        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "stock.released");
    }

    #[tokio::test]
    async fn stock_failed_cancels_pending_order() {
        let orders = InMemoryOrderStore::new();
        let clock = FixedClock::at_epoch();
        let order = confirmable_order(&orders, &clock).await;

        let event = SerializedEvent::from_event(&StockFailed {
            order_id: order.id,
            reason: "insufficient stock".into(),
        })
        .unwrap();
        let outcome = handle_stock_failed(&event, &orders, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
        assert_eq!(orders.get(order.id).await.unwrap().status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn stock_failed_is_a_no_op_once_confirmed() {
        let orders = InMemoryOrderStore::new();
        let clock = FixedClock::at_epoch();
        let mut order = confirmable_order(&orders, &clock).await;
        order.confirm(&clock).unwrap();
        orders.update(&order).await.unwrap();

        let event = SerializedEvent::from_event(&StockFailed {
            order_id: order.id,
            reason: "insufficient stock".into(),
        })
        .unwrap();
        let outcome = handle_stock_failed(&event, &orders, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
        assert_eq!(orders.get(order.id).await.unwrap().status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn unknown_order_is_acked_poison_message_tolerant() {
        let orders = InMemoryOrderStore::new();
        let clock = FixedClock::at_epoch();

        let event = SerializedEvent::from_event(&PaymentProcessed { order_id: Uuid::new_v4() }).unwrap();
        let outcome = handle_payment_processed(&event, &orders, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
    }
}
