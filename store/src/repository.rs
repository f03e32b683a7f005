//! Dyn-compatible repository traits so saga code can be written once
//! against `Arc<dyn OrderRepository>` / `Arc<dyn IdempotencyKeyStore>`
//! and run unmodified against either the Postgres-backed store or an
//! in-memory fake. Mirrors the manual boxed-future style
//! [`order_saga_core::event_bus::EventBus`] already uses rather than
//! pulling in an `async_trait` dependency for two small interfaces.

use crate::error::StoreError;
use order_saga_core::order::Order;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Persistence for the `Order` aggregate, with optimistic locking on
/// `row_version`.
pub trait OrderRepository: Send + Sync {
    /// Persist a brand-new order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the order cannot be persisted.
    fn create(&self, order: &Order) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Load an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such order exists.
    fn get(&self, id: Uuid) -> Pin<Box<dyn Future<Output = Result<Order, StoreError>> + Send + '_>>;

    /// Persist a mutation, enforcing optimistic concurrency on
    /// `row_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OptimisticConflict`] on a stale write.
    fn update(&self, order: &Order) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

/// Unique-key to resource-id mapping with first-writer-wins semantics.
pub trait IdempotencyKeyStore: Send + Sync {
    /// Claim `key` for `candidate_resource_id`; returns whichever id
    /// actually won the claim.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the claim cannot be recorded.
    fn try_insert(
        &self,
        key: &str,
        candidate_resource_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Uuid, StoreError>> + Send + '_>>;
}

impl OrderRepository for crate::order_store::OrderStore {
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

impl IdempotencyKeyStore for crate::idempotency_store::IdempotencyStore {
    fn try_insert(
        &self,
        key: &str,
        candidate_resource_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Uuid, StoreError>> + Send + '_>> {
        Box::pin(Self::try_insert(self, key, candidate_resource_id))
    }
}
