//! End-to-end exercise of the saga's happy path through the in-memory
//! bus: create → reserve → pay → confirm, with every consumer running
//! as a real background task against [`InMemoryEventBus`].

use order_saga_core::environment::{Clock, FixedClock};
use order_saga_core::event_bus::EventBus;
use order_saga_core::money::Money;
use order_saga_core::order::OrderStatus;
use order_saga_inventory::InventoryEngine;
use order_saga_saga::consumers::{payment, reservation, status_updater};
use order_saga_saga::handlers::{create_order, CreateOrderRequest};
use order_saga_store::repository::OrderRepository;
use order_saga_testing::{InMemoryEventBus, InMemoryIdempotencyStore, InMemoryOrderStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn happy_path_drives_order_to_a_terminal_payment_status() {
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
    let orders = Arc::new(InMemoryOrderStore::new());
    let orders_dyn: Arc<dyn OrderRepository> = Arc::clone(&orders);
    let idempotency = InMemoryIdempotencyStore::new();
    let inventory = Arc::new(InventoryEngine::new());
    inventory.set_stock("widget", 100);
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_epoch());
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(reservation::run_order_created(
        Arc::clone(&bus),
        Arc::clone(&inventory),
        reservation::DEFAULT_TTL_SECONDS,
        Arc::clone(&clock),
        shutdown_rx.clone(),
    ));
    tokio::spawn(payment::run(Arc::clone(&bus), Arc::clone(&orders_dyn), shutdown_rx.clone()));
    tokio::spawn(status_updater::run_payment_processed(
        Arc::clone(&bus),
        Arc::clone(&orders_dyn),
        Arc::clone(&clock),
        shutdown_rx.clone(),
    ));
    tokio::spawn(status_updater::run_payment_failed(
        Arc::clone(&bus),
        Arc::clone(&orders_dyn),
        Arc::clone(&clock),
        shutdown_rx.clone(),
    ));

    // Give every consumer's subscribe() call a chance to register with
    // the in-memory bus before anything is published; unlike a real
    // broker it holds no backlog for a subscriber that isn't listening
    // yet.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let order = create_order(
        CreateOrderRequest {
            customer_id: "cust-a".into(),
            items: vec![("widget".into(), 2, Money::from_minor_units(6_000, "TRY"))],
            idempotency_key: None,
        },
        orders.as_ref(),
        &idempotency,
        bus.as_ref(),
        clock.as_ref(),
    )
    .await
    .unwrap();

    let mut terminal_status = None;
    for _ in 0..500 {
        let current = orders.get(order.id).await.unwrap();
        if matches!(current.status, OrderStatus::Confirmed | OrderStatus::Cancelled) {
            terminal_status = Some(current.status);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(
        matches!(terminal_status, Some(OrderStatus::Confirmed) | Some(OrderStatus::Cancelled)),
        "order should reach a terminal payment status within the deadline, got {terminal_status:?}"
    );
}
