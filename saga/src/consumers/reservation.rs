//! Reservation Consumer: turns `order.created` into stock reservations
//! via the inventory engine, and independently drains `stock.released`
//! requests raised by compensating actions elsewhere in the saga.

use crate::{publish_terminal, run_consumer};
use chrono::Duration;
use order_saga_core::environment::Clock;
use order_saga_core::event::{OrderCreated, SerializedEvent, StockFailed, StockReleased, StockReserved};
use order_saga_core::event_bus::{ConsumeOutcome, EventBus, EventBusError};
use order_saga_inventory::InventoryEngine;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Consumer group bound to `order.created`.
pub const RESERVATION_QUEUE: &str = "reservation-consumer";
/// Consumer group bound to `stock.released`.
pub const STOCK_RELEASED_QUEUE: &str = "reservation-consumer.stock-released";
/// Prefetch per the bus's channel-per-consumer contract.
pub const PREFETCH: u16 = 10;
/// Default reservation TTL if `INVENTORY_TTL_SECONDS` is unset.
pub const DEFAULT_TTL_SECONDS: i64 = 600;

/// Reserve every line item of one `order.created` payload, in order,
/// stopping at the first failure and unwinding whatever was already
/// reserved. Emits `stock.reserved` on full success or `stock.failed`
/// otherwise.
pub async fn handle_order_created(
    event: &SerializedEvent,
    inventory: &InventoryEngine,
    bus: &dyn EventBus,
    ttl_seconds: i64,
    clock: &dyn Clock,
) -> ConsumeOutcome {
    let Ok(order_created) = event.decode::<OrderCreated>() else {
        tracing::error!(event_type = %event.event_type, "failed to decode order.created payload");
        return ConsumeOutcome::RejectNoRequeue;
    };

    let ttl = Duration::seconds(ttl_seconds);
    let mut reserved_ids: Vec<Uuid> = Vec::with_capacity(order_created.items.len());
    let mut failure_reason: Option<String> = None;

    for item in &order_created.items {
        let reservation_id = Uuid::new_v4();
        let ok = inventory.try_reserve(
            &item.product_id,
            item.quantity,
            reservation_id,
            Some(order_created.customer_id.as_str()),
            Some(order_created.order_id),
            ttl,
            clock,
        );
        if ok {
            reserved_ids.push(reservation_id);
        } else {
            failure_reason = Some(format!("insufficient stock for product {}", item.product_id));
            break;
        }
    }

    if let Some(reason) = failure_reason {
        for reservation_id in &reserved_ids {
            inventory.release(*reservation_id);
        }
        let failed = StockFailed {
            order_id: order_created.order_id,
            reason,
        };
        return publish_terminal(bus, &failed).await;
    }

    let reserved = StockReserved {
        order_id: order_created.order_id,
        total: order_created.total,
        reserved_at: clock.now(),
    };
    publish_terminal(bus, &reserved).await
}

/// Release every reservation held for the order named in one
/// `stock.released` payload.
pub async fn handle_stock_released(event: &SerializedEvent, inventory: &InventoryEngine) -> ConsumeOutcome {
    let Ok(released) = event.decode::<StockReleased>() else {
        tracing::error!(event_type = %event.event_type, "failed to decode stock.released payload");
        return ConsumeOutcome::RejectNoRequeue;
    };
    inventory.release_by_order(released.order_id);
    ConsumeOutcome::Ack
}

/// Run the `order.created` reservation loop until the bus closes the
/// stream.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run_order_created(
    bus: Arc<dyn EventBus>,
    inventory: Arc<InventoryEngine>,
    ttl_seconds: i64,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), EventBusError> {
    let loop_bus = Arc::clone(&bus);
    run_consumer(bus, RESERVATION_QUEUE, &["order.created"], PREFETCH, shutdown, move |event, _redelivery| {
        let inventory = Arc::clone(&inventory);
        let bus = Arc::clone(&loop_bus);
        let clock = Arc::clone(&clock);
        async move { handle_order_created(&event, &inventory, bus.as_ref(), ttl_seconds, clock.as_ref()).await }
    })
    .await
}

/// Run the independent `stock.released` drain loop until the bus
/// closes the stream.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription cannot be established
/// or a settle call fails.
pub async fn run_stock_released(
    bus: Arc<dyn EventBus>,
    inventory: Arc<InventoryEngine>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), EventBusError> {
    run_consumer(bus, STOCK_RELEASED_QUEUE, &["stock.released"], PREFETCH, shutdown, move |event, _redelivery| {
        let inventory = Arc::clone(&inventory);
        async move { handle_stock_released(&event, &inventory).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_saga_core::environment::FixedClock;
    use order_saga_core::event::OrderCreatedItem;
    use order_saga_testing::InMemoryEventBus;

    fn order_created_event(order_id: Uuid, items: Vec<(&str, u32)>) -> SerializedEvent {
        let event = OrderCreated {
            order_id,
            customer_id: "cust-a".into(),
            total: order_saga_core::money::Money::from_minor_units(12_000, "TRY"),
            items: items
                .into_iter()
                .map(|(product_id, quantity)| OrderCreatedItem {
                    product_id: product_id.to_string(),
                    quantity,
                })
                .collect(),
        };
        SerializedEvent::from_event(&event).unwrap()
    }

    #[tokio::test]
    async fn full_reservation_success_emits_stock_reserved() {
        let inventory = InventoryEngine::new();
        inventory.set_stock("widget", 100);
        let bus = InMemoryEventBus::new();
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();

        let event = order_created_event(order_id, vec![("widget", 5)]);
        let outcome = handle_order_created(&event, &inventory, &bus, DEFAULT_TTL_SECONDS, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
        assert_eq!(inventory.get_stock("widget"), 95);
        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "stock.reserved");
    }

    #[tokio::test]
    async fn partial_failure_unwinds_prior_reservations_and_emits_stock_failed() {
        let inventory = InventoryEngine::new();
        inventory.set_stock("widget", 10);
        inventory.set_stock("gadget", 1);
        let bus = InMemoryEventBus::new();
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();

        let event = order_created_event(order_id, vec![("widget", 3), ("gadget", 5)]);
        let outcome = handle_order_created(&event, &inventory, &bus, DEFAULT_TTL_SECONDS, &clock).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
        assert_eq!(inventory.get_stock("widget"), 10, "widget reservation must have been unwound");
        assert_eq!(inventory.get_stock("gadget"), 1);
        let published = bus.published();
        assert_eq!(published[0].event_type, "stock.failed");
    }

    #[tokio::test]
    async fn stock_released_releases_every_reservation_for_the_order() {
        let inventory = InventoryEngine::new();
        inventory.set_stock("widget", 10);
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();
        inventory.try_reserve("widget", 4, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);
        assert_eq!(inventory.get_stock("widget"), 6);

        let event = SerializedEvent::from_event(&StockReleased {
            order_id,
            reason: "payment_failed".into(),
        })
        .unwrap();
        let outcome = handle_stock_released(&event, &inventory).await;

        assert_eq!(outcome, ConsumeOutcome::Ack);
        assert_eq!(inventory.get_stock("widget"), 10);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_without_requeue() {
        let inventory = InventoryEngine::new();
        let bus = InMemoryEventBus::new();
        let clock = FixedClock::at_epoch();
        let bogus = SerializedEvent {
            event_type: "order.created".into(),
            data: b"not json".to_vec(),
            metadata: None,
        };

        let outcome = handle_order_created(&bogus, &inventory, &bus, DEFAULT_TTL_SECONDS, &clock).await;
        assert_eq!(outcome, ConsumeOutcome::RejectNoRequeue);
    }
}
