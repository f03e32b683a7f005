//! Per-product reservation engine: one lock per product (lazily
//! created, never deleted), TTL-based expiry, idempotent reservations,
//! the 50% rule, and flash-sale per-customer caps.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use order_saga_core::environment::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

/// Below this level a successful reservation emits a low-stock signal.
pub const LOW_STOCK_THRESHOLD: i64 = 10;
/// Maximum cumulative quantity a single customer may hold reserved
/// against a flash-sale product.
pub const FLASH_SALE_MAX_PER_CUSTOMER: u32 = 2;

/// A single active reservation.
#[derive(Debug, Clone)]
struct Reservation {
    order_id: Option<Uuid>,
    customer_id: Option<String>,
    quantity: u32,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProductState {
    stock: i64,
    reservations: HashMap<Uuid, Reservation>,
    idempotent_orders: HashSet<Uuid>,
    customer_ledger: HashMap<String, u32>,
}

/// Concurrent, in-memory inventory reservation engine.
///
/// Per-product state lives behind `DashMap`'s per-shard locking, which
/// gives every reserve/release read-modify-write sequence for a given
/// product an effective critical section without a separate lock type.
pub struct InventoryEngine {
    products: DashMap<String, ProductState>,
    reservation_index: DashMap<Uuid, String>,
    order_index: DashMap<Uuid, Vec<Uuid>>,
    flash_sale_products: RwLock<HashSet<String>>,
}

impl Default for InventoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryEngine {
    /// Build an empty engine: no stock, no flash-sale products.
    #[must_use]
    pub fn new() -> Self {
        Self {
            products: DashMap::new(),
            reservation_index: DashMap::new(),
            order_index: DashMap::new(),
            flash_sale_products: RwLock::new(HashSet::new()),
        }
    }

    /// Attempt to reserve `quantity` units of `product`. Never panics
    /// or returns an error: every policy violation is a plain `false`.
    ///
    /// When `order_id` is `Some` and a reservation for that order
    /// already exists against this product, returns `true` with no
    /// further side effect — this is what makes at-least-once
    /// redelivery of a reservation request safe.
    #[allow(clippy::too_many_arguments)]
    pub fn try_reserve(
        &self,
        product: &str,
        quantity: u32,
        reservation_id: Uuid,
        customer_id: Option<&str>,
        order_id: Option<Uuid>,
        ttl: Duration,
        clock: &dyn Clock,
    ) -> bool {
        let mut state = self.products.entry(product.to_string()).or_default();

        if let Some(oid) = order_id {
            if state.idempotent_orders.contains(&oid) {
                return true;
            }
        }

        if quantity == 0 {
            return false;
        }

        let available = state.stock;

        if order_id.is_some() {
            let max_allowed = 1.max((available as f64 * 0.5).floor() as i64);
            if i64::from(quantity) > max_allowed {
                return false;
            }
        }

        let is_flash_sale = self
            .flash_sale_products
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(product);

        if is_flash_sale {
            if let Some(customer) = customer_id {
                let existing = state.customer_ledger.get(customer).copied().unwrap_or(0);
                if existing + quantity > FLASH_SALE_MAX_PER_CUSTOMER {
                    return false;
                }
            }
        }

        if available < i64::from(quantity) {
            return false;
        }

        state.stock -= i64::from(quantity);
        state.reservations.insert(
            reservation_id,
            Reservation {
                order_id,
                customer_id: customer_id.map(ToString::to_string),
                quantity,
                expires_at: clock.now() + ttl,
            },
        );

        if is_flash_sale {
            if let Some(customer) = customer_id {
                *state.customer_ledger.entry(customer.to_string()).or_insert(0) += quantity;
            }
        }

        if let Some(oid) = order_id {
            state.idempotent_orders.insert(oid);
            drop(state);
            self.order_index.entry(oid).or_default().push(reservation_id);
            self.reservation_index.insert(reservation_id, product.to_string());
            let remaining = self.products.get(product).map(|s| s.stock).unwrap_or_default();
            if remaining < LOW_STOCK_THRESHOLD {
                tracing::warn!(product, remaining, "low stock signal");
            }
            return true;
        }

        let remaining = state.stock;
        drop(state);
        self.reservation_index.insert(reservation_id, product.to_string());
        if remaining < LOW_STOCK_THRESHOLD {
            tracing::warn!(product, remaining, "low stock signal");
        }
        true
    }

    /// Release a single reservation. No-op if the reservation id is
    /// unknown (already released, or never existed).
    pub fn release(&self, reservation_id: Uuid) {
        let Some((_, product)) = self.reservation_index.remove(&reservation_id) else {
            return;
        };
        self.release_one(&product, reservation_id);
    }

    fn release_one(&self, product: &str, reservation_id: Uuid) {
        let Some(mut state) = self.products.get_mut(product) else {
            return;
        };
        let Some(reservation) = state.reservations.remove(&reservation_id) else {
            return;
        };

        state.stock += i64::from(reservation.quantity);

        if let Some(customer) = &reservation.customer_id {
            if let Some(held) = state.customer_ledger.get_mut(customer) {
                *held = held.saturating_sub(reservation.quantity);
            }
        }

        if let Some(oid) = reservation.order_id {
            state.idempotent_orders.remove(&oid);
        }

        tracing::debug!(product, %reservation_id, "reservation released");
    }

    /// Release every reservation associated with `order_id`.
    pub fn release_by_order(&self, order_id: Uuid) {
        let Some((_, reservation_ids)) = self.order_index.remove(&order_id) else {
            return;
        };
        for reservation_id in reservation_ids {
            self.release(reservation_id);
        }
    }

    /// Sweep for and release every reservation that has expired as of
    /// `clock.now()`. Intended to be invoked periodically (every 60s)
    /// by a background task.
    pub fn release_expired(&self, clock: &dyn Clock) -> usize {
        let now = clock.now();
        let expired: Vec<Uuid> = self
            .reservation_index
            .iter()
            .filter_map(|entry| {
                let reservation_id = *entry.key();
                let product = entry.value();
                let state = self.products.get(product)?;
                let reservation = state.reservations.get(&reservation_id)?;
                (reservation.expires_at <= now).then_some(reservation_id)
            })
            .collect();

        let count = expired.len();
        for reservation_id in expired {
            self.release(reservation_id);
        }
        if count > 0 {
            tracing::info!(count, "ttl sweep released expired reservations");
        }
        count
    }

    /// Current unreserved stock for each requested product (0 if the
    /// product has never been seen).
    #[must_use]
    pub fn check_availability(&self, products: &[String]) -> HashMap<String, i64> {
        products
            .iter()
            .map(|p| {
                let qty = self.products.get(p).map(|s| s.stock).unwrap_or(0);
                (p.clone(), qty)
            })
            .collect()
    }

    /// Current unreserved stock for a single product (0 if never set).
    #[must_use]
    pub fn get_stock(&self, product: &str) -> i64 {
        self.products.get(product).map(|s| s.stock).unwrap_or(0)
    }

    /// Set `product`'s stock to an absolute quantity. Creates the
    /// product's state if it does not exist yet.
    pub fn set_stock(&self, product: &str, quantity: i64) {
        self.products.entry(product.to_string()).or_default().stock = quantity;
    }

    /// Set absolute stock for many products at once.
    pub fn bulk_set(&self, quantities: &HashMap<String, i64>) {
        for (product, quantity) in quantities {
            self.set_stock(product, *quantity);
        }
    }

    /// Atomically replace the set of products under flash-sale caps.
    pub fn set_flash_sale_products(&self, products: HashSet<String>) {
        let mut guard = self
            .flash_sale_products
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = products;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_saga_core::environment::FixedClock;

    fn engine_with_stock(product: &str, qty: i64) -> InventoryEngine {
        let engine = InventoryEngine::new();
        engine.set_stock(product, qty);
        engine
    }

    #[test]
    fn reserve_within_available_stock_succeeds() {
        let engine = engine_with_stock("widget", 100);
        let clock = FixedClock::at_epoch();
        let ok = engine.try_reserve("widget", 5, Uuid::new_v4(), None, None, Duration::minutes(10), &clock);
        assert!(ok);
        assert_eq!(engine.get_stock("widget"), 95);
    }

    #[test]
    fn reserve_more_than_available_fails() {
        let engine = engine_with_stock("widget", 3);
        let clock = FixedClock::at_epoch();
        let ok = engine.try_reserve("widget", 5, Uuid::new_v4(), None, None, Duration::minutes(10), &clock);
        assert!(!ok);
        assert_eq!(engine.get_stock("widget"), 3);
    }

    #[test]
    fn fifty_percent_rule_blocks_oversized_order_reservation() {
        let engine = engine_with_stock("widget", 10);
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();
        let ok = engine.try_reserve("widget", 6, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);
        assert!(!ok, "6 > max(1, floor(10*0.5))=5 should be rejected");
    }

    #[test]
    fn fifty_percent_rule_allows_at_least_one_unit_on_low_stock() {
        let engine = engine_with_stock("widget", 1);
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();
        let ok = engine.try_reserve("widget", 1, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);
        assert!(ok, "max(1, floor(1*0.5))=1 must still allow a single unit");
    }

    #[test]
    fn reservation_is_idempotent_per_order_and_product() {
        let engine = engine_with_stock("widget", 10);
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();
        let first = engine.try_reserve("widget", 2, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);
        assert!(first);
        assert_eq!(engine.get_stock("widget"), 8);

        let second = engine.try_reserve("widget", 2, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);
        assert!(second, "redelivery for the same order must short-circuit to true");
        assert_eq!(engine.get_stock("widget"), 8, "no additional stock should be consumed");
    }

    #[test]
    fn flash_sale_cap_blocks_over_two_units_per_customer() {
        let engine = engine_with_stock("limited-edition", 100);
        engine.set_flash_sale_products(HashSet::from(["limited-edition".to_string()]));
        let clock = FixedClock::at_epoch();

        let first = engine.try_reserve("limited-edition", 2, Uuid::new_v4(), Some("cust-1"), None, Duration::minutes(10), &clock);
        assert!(first);

        let second = engine.try_reserve("limited-edition", 1, Uuid::new_v4(), Some("cust-1"), None, Duration::minutes(10), &clock);
        assert!(!second, "cumulative reserved quantity of 3 exceeds the cap of 2");
    }

    #[test]
    fn release_returns_stock_and_clears_idempotent_key() {
        let engine = engine_with_stock("widget", 10);
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();
        let reservation_id = Uuid::new_v4();
        engine.try_reserve("widget", 4, reservation_id, None, Some(order_id), Duration::minutes(10), &clock);
        assert_eq!(engine.get_stock("widget"), 6);

        engine.release(reservation_id);
        assert_eq!(engine.get_stock("widget"), 10);

        let reserved_again = engine.try_reserve("widget", 4, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);
        assert!(reserved_again, "clearing the idempotent key must allow a fresh reservation for the same order");
        assert_eq!(engine.get_stock("widget"), 6);
    }

    #[test]
    fn release_by_order_releases_every_product() {
        let engine = InventoryEngine::new();
        engine.set_stock("a", 10);
        engine.set_stock("b", 10);
        let clock = FixedClock::at_epoch();
        let order_id = Uuid::new_v4();
        engine.try_reserve("a", 3, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);
        engine.try_reserve("b", 4, Uuid::new_v4(), None, Some(order_id), Duration::minutes(10), &clock);

        engine.release_by_order(order_id);

        assert_eq!(engine.get_stock("a"), 10);
        assert_eq!(engine.get_stock("b"), 10);
    }

    #[test]
    fn release_expired_sweeps_reservations_past_ttl() {
        let engine = engine_with_stock("widget", 10);
        let clock = FixedClock::at_epoch();
        engine.try_reserve("widget", 3, Uuid::new_v4(), None, None, Duration::seconds(30), &clock);
        assert_eq!(engine.get_stock("widget"), 7);

        let later = FixedClock::at(clock.now() + Duration::seconds(31));
        let released = engine.release_expired(&later);
        assert_eq!(released, 1);
        assert_eq!(engine.get_stock("widget"), 10);
    }

    #[test]
    fn release_of_unknown_reservation_is_a_no_op() {
        let engine = engine_with_stock("widget", 10);
        engine.release(Uuid::new_v4());
        assert_eq!(engine.get_stock("widget"), 10);
    }

    #[test]
    fn check_availability_reports_zero_for_unseen_products() {
        let engine = engine_with_stock("widget", 5);
        let result = engine.check_availability(&["widget".to_string(), "ghost".to_string()]);
        assert_eq!(result.get("widget"), Some(&5));
        assert_eq!(result.get("ghost"), Some(&0));
    }

    #[test]
    fn bulk_set_applies_every_quantity() {
        let engine = InventoryEngine::new();
        engine.bulk_set(&HashMap::from([("a".to_string(), 10), ("b".to_string(), 20)]));
        assert_eq!(engine.get_stock("a"), 10);
        assert_eq!(engine.get_stock("b"), 20);
    }
}
