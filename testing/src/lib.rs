//! In-memory fakes for the order saga's external collaborators: the
//! event bus, the order store, and the idempotency store. Used by the
//! `saga` crate's consumer tests so a full Kafka/Postgres stack is
//! never required to exercise saga logic.
//!
//! The deterministic clock used throughout these tests
//! ([`order_saga_core::environment::FixedClock`]) lives in `core`
//! rather than here, since `core`'s own unit tests need it too.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event_bus;
pub mod idempotency_store;
pub mod order_store;

pub use event_bus::InMemoryEventBus;
pub use idempotency_store::InMemoryIdempotencyStore;
pub use order_store::InMemoryOrderStore;
