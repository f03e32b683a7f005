//! Event types carried over the bus. Bodies are JSON (not bincode): the
//! wire protocol mandates `application/json`, UTF-8, lowerCamelCase keys,
//! with `orderId` as the first field of every body.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from event (de)serialization.
#[derive(Debug, Error)]
pub enum EventError {
    /// The payload could not be encoded as JSON.
    #[error("failed to serialize event: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The payload could not be decoded from JSON.
    #[error("failed to deserialize event: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// A logical event name used as both the bus routing key and the fanout
/// exchange name.
pub trait Event: Serialize + DeserializeOwned {
    /// The logical event name, e.g. `"order.created"`.
    fn event_type() -> &'static str;

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialize`] if encoding fails.
    fn to_json(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(EventError::Serialize)
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialize`] if decoding fails.
    fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(EventError::Deserialize)
    }
}

/// An event as it travels over the bus: a type tag plus an opaque JSON
/// payload. Consumers look at `event_type` to decide how to decode
/// `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The logical event name (routing key).
    pub event_type: String,
    /// JSON-encoded payload bytes.
    pub data: Vec<u8>,
    /// Free-form metadata (correlation id, redelivery count, ...).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Wrap a concrete, typed event for transport.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialize`] if the event fails to encode.
    pub fn from_event<E: Event>(event: &E) -> Result<Self, EventError> {
        Ok(Self {
            event_type: E::event_type().to_string(),
            data: event.to_json()?,
            metadata: None,
        })
    }

    /// Decode the payload into a concrete event type. The caller is
    /// responsible for checking `event_type` matches first.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialize`] if the payload does not match
    /// `E`.
    pub fn decode<E: Event>(&self) -> Result<E, EventError> {
        E::from_json(&self.data)
    }
}

/// `order.created` — published exactly once, after the order has been
/// durably committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    /// The created order's id.
    pub order_id: Uuid,
    /// The customer who placed the order.
    pub customer_id: String,
    /// Total order value.
    pub total: crate::money::Money,
    /// Line items, flattened for downstream consumers.
    pub items: Vec<OrderCreatedItem>,
}

/// A single line item as carried in [`OrderCreated`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedItem {
    /// Product identifier.
    pub product_id: String,
    /// Quantity ordered.
    pub quantity: u32,
}

impl Event for OrderCreated {
    fn event_type() -> &'static str {
        "order.created"
    }
}

/// `stock.reserved` — emitted when every line item of an order was
/// successfully reserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReserved {
    /// The order whose items were reserved.
    pub order_id: Uuid,
    /// Total order value, carried forward for the payment consumer.
    pub total: crate::money::Money,
    /// When the reservation completed.
    pub reserved_at: chrono::DateTime<chrono::Utc>,
}

impl Event for StockReserved {
    fn event_type() -> &'static str {
        "stock.reserved"
    }
}

/// `stock.failed` — emitted when any line item could not be reserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockFailed {
    /// The order whose reservation failed.
    pub order_id: Uuid,
    /// Human-readable reason.
    pub reason: String,
}

impl Event for StockFailed {
    fn event_type() -> &'static str {
        "stock.failed"
    }
}

/// `stock.released` — requests that any reservations held for an order
/// be released back to available stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReleased {
    /// The order whose reservations should be released.
    pub order_id: Uuid,
    /// Why the release was requested.
    pub reason: String,
}

impl Event for StockReleased {
    fn event_type() -> &'static str {
        "stock.released"
    }
}

/// `payment.processed` — the simulated payment succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessed {
    /// The order that was paid for.
    pub order_id: Uuid,
}

impl Event for PaymentProcessed {
    fn event_type() -> &'static str {
        "payment.processed"
    }
}

/// `payment.failed` — the simulated payment failed terminally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    /// The order whose payment failed.
    pub order_id: Uuid,
    /// Why the payment failed (`fraud_verification_required`,
    /// `processor_error`, ...).
    pub reason: String,
}

impl Event for PaymentFailed {
    fn event_type() -> &'static str {
        "payment.failed"
    }
}

/// `order.cancelled` — the order reached the `Cancelled` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    /// The cancelled order.
    pub order_id: Uuid,
    /// When the cancellation took effect.
    pub at: chrono::DateTime<chrono::Utc>,
    /// Optional cancellation reason.
    pub reason: Option<String>,
}

impl Event for OrderCancelled {
    fn event_type() -> &'static str {
        "order.cancelled"
    }
}

/// `order.shipped` — the order was handed off to the carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderShipped {
    /// The shipped order.
    pub order_id: Uuid,
    /// When the shipment was recorded.
    pub at: chrono::DateTime<chrono::Utc>,
}

impl Event for OrderShipped {
    fn event_type() -> &'static str {
        "order.shipped"
    }
}

/// `order.delivered` — the order was received by the customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDelivered {
    /// The delivered order.
    pub order_id: Uuid,
    /// When delivery was recorded.
    pub at: chrono::DateTime<chrono::Utc>,
}

impl Event for OrderDelivered {
    fn event_type() -> &'static str {
        "order.delivered"
    }
}

/// `refund.processed` — the simulated refund succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundProcessed {
    /// The order that was refunded.
    pub order_id: Uuid,
}

impl Event for RefundProcessed {
    fn event_type() -> &'static str {
        "refund.processed"
    }
}

/// `refund.failed` — the simulated refund exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundFailed {
    /// The order whose refund failed.
    pub order_id: Uuid,
    /// Why the refund ultimately failed.
    pub reason: String,
}

impl Event for RefundFailed {
    fn event_type() -> &'static str {
        "refund.failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;

    #[test]
    fn order_created_round_trips_through_json() {
        let event = OrderCreated {
            order_id: Uuid::new_v4(),
            customer_id: "cust-a".into(),
            total: Money::from_minor_units(12000, "TRY"),
            items: vec![OrderCreatedItem {
                product_id: "P1".into(),
                quantity: 2,
            }],
        };
        let serialized = SerializedEvent::from_event(&event).unwrap();
        assert_eq!(serialized.event_type, "order.created");
        let decoded: OrderCreated = serialized.decode().unwrap();
        assert_eq!(decoded.order_id, event.order_id);
        assert_eq!(decoded.items.len(), 1);
    }

    #[test]
    fn order_id_is_first_field_in_json_body() {
        let event = StockFailed {
            order_id: Uuid::new_v4(),
            reason: "insufficient stock".into(),
        };
        let bytes = event.to_json().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("{\"orderId\":"));
    }
}
