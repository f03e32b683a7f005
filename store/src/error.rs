//! Storage-layer error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The `row_version` the caller read no longer matches the stored
    /// row; the caller must reload and retry.
    #[error("optimistic concurrency conflict on order {order_id}")]
    OptimisticConflict {
        /// The order whose write was rejected.
        order_id: Uuid,
    },

    /// No order exists with the given id.
    #[error("order {0} not found")]
    NotFound(Uuid),

    /// The underlying database call failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
