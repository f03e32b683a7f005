//! Postgres persistence for the order saga: the `Order` aggregate with
//! optimistic concurrency, the idempotency key store, and the dead
//! letter queue for rejected bus deliveries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter_queue;
pub mod error;
pub mod idempotency_store;
pub mod order_store;
pub mod repository;

pub use dead_letter_queue::{DeadLetterQueue, DlqStatus, FailedEvent};
pub use error::StoreError;
pub use idempotency_store::IdempotencyStore;
pub use order_store::OrderStore;
pub use repository::{IdempotencyKeyStore, OrderRepository};
