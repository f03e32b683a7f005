//! In-memory inventory reservation engine: per-product locking, TTL
//! expiry, the 50% rule, and flash-sale per-customer caps.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;

pub use engine::{InventoryEngine, FLASH_SALE_MAX_PER_CUSTOMER, LOW_STOCK_THRESHOLD};
