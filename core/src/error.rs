//! Domain error taxonomy.

use thiserror::Error;

/// Errors raised by the order aggregate's domain methods.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The create command failed basic invariant checks (item count,
    /// total bounds, non-positive quantity, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A status transition was attempted that the DAG does not allow.
    #[error("illegal transition from {from} via {method}")]
    IllegalTransition {
        /// The status the order was in.
        from: String,
        /// The domain method that was invoked.
        method: String,
    },

    /// Cancellation was attempted outside the 2-hour window.
    #[error("cancellation window exceeded")]
    CancellationWindowExceeded,
}
