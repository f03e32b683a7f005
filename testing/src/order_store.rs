//! In-memory fake matching [`order_saga_store::OrderStore`]'s contract,
//! including optimistic-concurrency semantics on `row_version`.

use order_saga_core::order::Order;
use order_saga_store::repository::OrderRepository;
use order_saga_store::StoreError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory order repository for fast, deterministic saga tests.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl InMemoryOrderStore {
    /// Build an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a brand-new order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if an order with the same id
    /// already exists (this fake never returns [`sqlx::Error`]; the
    /// variant is only reused to keep the call-site error type
    /// identical to [`order_saga_store::OrderStore`]).
    pub async fn create(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        orders.insert(order.id, order.clone());
        Ok(())
    }

    /// Load an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such order exists.
    pub async fn get(&self, id: Uuid) -> Result<Order, StoreError> {
        self.orders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Persist a mutation, enforcing the same optimistic-concurrency
    /// check as the Postgres-backed store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OptimisticConflict`] if `order.row_version`
    /// does not match the stored row's version, or [`StoreError::NotFound`]
    /// if the order does not exist.
    pub async fn update(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let stored = orders.get(&order.id).ok_or(StoreError::NotFound(order.id))?;
        if stored.row_version != order.row_version {
            return Err(StoreError::OptimisticConflict { order_id: order.id });
        }
        let mut next = order.clone();
        next.row_version += 1;
        orders.insert(order.id, next);
        Ok(())
    }
}

impl OrderRepository for InMemoryOrderStore {
    fn create(&self, order: &Order) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(Self::create(self, order))
    }

    fn get(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Order, StoreError>> + Send + '_>> {
        Box::pin(Self::get(self, id))
    }

    fn update(&self, order: &Order) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(Self::update(self, order))
    }
}
