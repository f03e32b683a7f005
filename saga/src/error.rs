//! Application-layer error taxonomy for the command handlers. A guard
//! violation (`Domain`) is the only variant a caller-facing boundary
//! would need to map to HTTP Conflict; the others are infrastructure
//! failures.

use order_saga_core::error::DomainError;
use order_saga_core::event_bus::EventBusError;
use order_saga_store::StoreError;
use thiserror::Error;

/// Errors raised by the create/cancel/ship/deliver command handlers.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The domain aggregate rejected the requested transition.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Persistence failed (including an optimistic concurrency
    /// conflict, which the caller should treat as retryable).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event bus could not publish the resulting event.
    #[error(transparent)]
    Bus(#[from] EventBusError),
}
