//! The Order aggregate: a durable state machine with guarded transitions.

use crate::environment::Clock;
use crate::error::DomainError;
use crate::money::Money;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle status. Transitions form a DAG:
/// `Pending -> Confirmed -> Shipped -> Delivered`, and
/// `Pending|Confirmed -> Cancelled`. No other transition is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    /// Freshly created, awaiting stock reservation and payment.
    Pending,
    /// Payment processed; stock reserved and consumed.
    Confirmed,
    /// Cancelled, either before or after confirmation.
    Cancelled,
    /// Handed off to the carrier.
    Shipped,
    /// Received by the customer. Terminal.
    Delivered,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Cancelled => "Cancelled",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
        };
        write!(f, "{s}")
    }
}

/// A line item owned by exactly one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Line item identifier.
    pub id: Uuid,
    /// Owning order.
    pub order_id: Uuid,
    /// Product identifier.
    pub product_id: String,
    /// Quantity ordered, always > 0.
    pub quantity: u32,
    /// Price per unit.
    pub unit_price: Money,
}

impl OrderItem {
    /// `round(unit_price * quantity, 2)` — exact under the minor-unit
    /// representation used by [`Money`].
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.unit_price.line_total(self.quantity)
    }
}

/// Maximum number of line items an order may carry.
pub const MAX_ITEMS: usize = 20;
/// Minimum total amount (in minor units) for a valid order.
pub const MIN_TOTAL_MINOR_UNITS: i64 = 100 * 100;
/// Maximum total amount (in minor units) for a valid order.
pub const MAX_TOTAL_MINOR_UNITS: i64 = 50_000 * 100;
/// The cancellation window: cancellation is legal only while
/// `now - created_at <= CANCELLATION_WINDOW`.
pub const CANCELLATION_WINDOW_HOURS: i64 = 2;

/// The order aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Server-assigned identifier.
    pub id: Uuid,
    /// Identifier of the customer who placed the order.
    pub customer_id: String,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order was confirmed, if ever.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the order was cancelled, if ever.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the order was shipped, if ever.
    pub shipped_at: Option<DateTime<Utc>>,
    /// When the order was delivered, if ever.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Reason given for cancellation, if cancelled. At most 200 chars.
    pub cancel_reason: Option<String>,
    /// Sum of all line totals.
    pub total_amount: Money,
    /// Optimistic concurrency token; bumped on every persisted mutation.
    pub row_version: i64,
    /// Ordered line items, length in `[1, 20]`.
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Construct a new pending order, validating every aggregate
    /// invariant. Does not touch storage or the bus.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the item count or total
    /// amount falls outside the allowed bounds, or any item has a
    /// non-positive quantity.
    pub fn create(
        customer_id: String,
        item_inputs: Vec<(String, u32, Money)>,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        if item_inputs.is_empty() || item_inputs.len() > MAX_ITEMS {
            return Err(DomainError::Validation(format!(
                "order must have between 1 and {MAX_ITEMS} items, got {}",
                item_inputs.len()
            )));
        }

        let order_id = Uuid::new_v4();
        let mut items = Vec::with_capacity(item_inputs.len());
        let mut total = Money::zero();

        for (product_id, quantity, unit_price) in item_inputs {
            if quantity == 0 {
                return Err(DomainError::Validation(format!(
                    "quantity for product {product_id} must be positive"
                )));
            }
            let item = OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id,
                quantity,
                unit_price,
            };
            total = total.checked_add(item.line_total());
            items.push(item);
        }

        if total.minor_units() < MIN_TOTAL_MINOR_UNITS || total.minor_units() > MAX_TOTAL_MINOR_UNITS {
            return Err(DomainError::Validation(format!(
                "total amount {total} outside allowed range [100, 50000]"
            )));
        }

        Ok(Self {
            id: order_id,
            customer_id,
            status: OrderStatus::Pending,
            created_at: clock.now(),
            confirmed_at: None,
            cancelled_at: None,
            shipped_at: None,
            delivered_at: None,
            cancel_reason: None,
            total_amount: total,
            row_version: 0,
            items,
        })
    }

    fn illegal_transition(&self, method: &str) -> DomainError {
        DomainError::IllegalTransition {
            from: self.status.to_string(),
            method: method.to_string(),
        }
    }

    /// `Pending -> Confirmed`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::IllegalTransition`] unless the order is
    /// currently `Pending`.
    pub fn confirm(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(self.illegal_transition("Confirm"));
        }
        self.status = OrderStatus::Confirmed;
        self.confirmed_at = Some(clock.now());
        Ok(())
    }

    /// `Pending|Confirmed -> Cancelled`, guarded by the 2-hour
    /// cancellation window measured from `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::IllegalTransition`] if the order is
    /// already `Cancelled`, `Shipped`, or `Delivered`; returns
    /// [`DomainError::CancellationWindowExceeded`] if more than two
    /// hours have elapsed since creation.
    pub fn cancel(&mut self, reason: String, clock: &dyn Clock) -> Result<(), DomainError> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(self.illegal_transition("Cancel"));
        }
        let now = clock.now();
        if now - self.created_at > Duration::hours(CANCELLATION_WINDOW_HOURS) {
            return Err(DomainError::CancellationWindowExceeded);
        }
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancel_reason = Some(reason.chars().take(200).collect());
        Ok(())
    }

    /// `Confirmed -> Shipped`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::IllegalTransition`] unless the order is
    /// currently `Confirmed`.
    pub fn mark_shipped(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        if self.status != OrderStatus::Confirmed {
            return Err(self.illegal_transition("MarkShipped"));
        }
        self.status = OrderStatus::Shipped;
        self.shipped_at = Some(clock.now());
        Ok(())
    }

    /// `Shipped -> Delivered`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::IllegalTransition`] unless the order is
    /// currently `Shipped`.
    pub fn mark_delivered(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        if self.status != OrderStatus::Shipped {
            return Err(self.illegal_transition("MarkDelivered"));
        }
        self.status = OrderStatus::Delivered;
        self.delivered_at = Some(clock.now());
        Ok(())
    }
}
