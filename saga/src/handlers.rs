//! Create/Cancel/Ship/Deliver command handlers: each loads or builds
//! the aggregate, invokes the guarded domain method, persists, and
//! publishes exactly the event the transition implies.

use crate::publish_event;
use crate::SagaError;
use order_saga_core::environment::Clock;
use order_saga_core::event::{OrderCancelled, OrderCreated, OrderCreatedItem, OrderDelivered, OrderShipped};
use order_saga_core::event_bus::EventBus;
use order_saga_core::money::Money;
use order_saga_core::order::Order;
use order_saga_store::repository::{IdempotencyKeyStore, OrderRepository};
use uuid::Uuid;

/// Input to [`create_order`].
pub struct CreateOrderRequest {
    /// The customer placing the order.
    pub customer_id: String,
    /// Line items as `(product_id, quantity, unit_price)`.
    pub items: Vec<(String, u32, Money)>,
    /// Client-supplied idempotency key, if the caller wants retry
    /// safety across repeated submissions of the same logical order.
    pub idempotency_key: Option<String>,
}

/// Build a new order, persist it, and publish `order.created` exactly
/// once on first successful persistence. A retry with the same
/// `idempotency_key` returns the original order without publishing
/// again.
///
/// # Errors
///
/// Returns [`SagaError::Domain`] if the requested items violate an
/// aggregate invariant, [`SagaError::Store`] if persistence fails, or
/// [`SagaError::Bus`] if the resulting event cannot be published.
pub async fn create_order(
    request: CreateOrderRequest,
    orders: &dyn OrderRepository,
    idempotency: &dyn IdempotencyKeyStore,
    bus: &dyn EventBus,
    clock: &dyn Clock,
) -> Result<Order, SagaError> {
    let order = Order::create(request.customer_id, request.items, clock)?;

    if let Some(key) = &request.idempotency_key {
        let winning_id = idempotency.try_insert(key, order.id).await?;
        if winning_id != order.id {
            tracing::info!(
                idempotency_key = key,
                order_id = %winning_id,
                "idempotency key already claimed, returning existing order"
            );
            return Ok(orders.get(winning_id).await?);
        }
    }

    orders.create(&order).await?;

    let event = OrderCreated {
        order_id: order.id,
        customer_id: order.customer_id.clone(),
        total: order.total_amount,
        items: order
            .items
            .iter()
            .map(|item| OrderCreatedItem {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect(),
    };
    publish_event(bus, &event).await?;

    tracing::info!(order_id = %order.id, "order created");
    Ok(order)
}

/// Admin-path compensation for the case where [`create_order`]
/// committed the order but its publish confirm never arrived (or was
/// lost to a broker reconnect): re-publish `order.created` for an
/// already-persisted order. Unconditional and not idempotency-key
/// gated — callers are expected to have already confirmed the
/// original event never reached the bus before invoking this.
///
/// # Errors
///
/// Returns [`SagaError::Store`] if `order_id` cannot be loaded, or
/// [`SagaError::Bus`] if the event cannot be published.
pub async fn retry_publish(
    order_id: Uuid,
    orders: &dyn OrderRepository,
    bus: &dyn EventBus,
) -> Result<Order, SagaError> {
    let order = orders.get(order_id).await?;

    let event = OrderCreated {
        order_id: order.id,
        customer_id: order.customer_id.clone(),
        total: order.total_amount,
        items: order
            .items
            .iter()
            .map(|item| OrderCreatedItem {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect(),
    };
    publish_event(bus, &event).await?;

    tracing::info!(order_id = %order.id, "order.created re-published via admin retry path");
    Ok(order)
}

/// Cancel `order_id`, guarded by the 2-hour cancellation window, and
/// publish `order.cancelled`.
///
/// # Errors
///
/// Returns [`SagaError::Domain`] on an illegal transition or an
/// expired cancellation window, [`SagaError::Store`] on a persistence
/// failure (including a stale `row_version`), or [`SagaError::Bus`] if
/// the event cannot be published.
pub async fn cancel_order(
    order_id: Uuid,
    reason: String,
    orders: &dyn OrderRepository,
    bus: &dyn EventBus,
    clock: &dyn Clock,
) -> Result<Order, SagaError> {
    let mut order = orders.get(order_id).await?;
    order.cancel(reason, clock)?;
    orders.update(&order).await?;

    let event = OrderCancelled {
        order_id: order.id,
        at: order.cancelled_at.unwrap_or_else(|| clock.now()),
        reason: order.cancel_reason.clone(),
    };
    publish_event(bus, &event).await?;

    Ok(order)
}

/// Mark `order_id` shipped and publish `order.shipped`.
///
/// # Errors
///
/// Returns [`SagaError::Domain`] unless the order is `Confirmed`,
/// [`SagaError::Store`] on a persistence failure, or [`SagaError::Bus`]
/// if the event cannot be published.
pub async fn ship_order(
    order_id: Uuid,
    orders: &dyn OrderRepository,
    bus: &dyn EventBus,
    clock: &dyn Clock,
) -> Result<Order, SagaError> {
    let mut order = orders.get(order_id).await?;
    order.mark_shipped(clock)?;
    orders.update(&order).await?;

    let event = OrderShipped {
        order_id: order.id,
        at: order.shipped_at.unwrap_or_else(|| clock.now()),
    };
    publish_event(bus, &event).await?;

    Ok(order)
}

/// Mark `order_id` delivered and publish `order.delivered`.
///
/// # Errors
///
/// Returns [`SagaError::Domain`] unless the order is `Shipped`,
/// [`SagaError::Store`] on a persistence failure, or [`SagaError::Bus`]
/// if the event cannot be published.
pub async fn deliver_order(
    order_id: Uuid,
    orders: &dyn OrderRepository,
    bus: &dyn EventBus,
    clock: &dyn Clock,
) -> Result<Order, SagaError> {
    let mut order = orders.get(order_id).await?;
    order.mark_delivered(clock)?;
    orders.update(&order).await?;

    let event = OrderDelivered {
        order_id: order.id,
        at: order.delivered_at.unwrap_or_else(|| clock.now()),
    };
    publish_event(bus, &event).await?;

    Ok(order)
}
