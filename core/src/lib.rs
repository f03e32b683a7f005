//! Domain types and core abstractions for the order saga coordinator:
//! the `Order` aggregate, the event catalogue carried over the bus, and
//! the dependency-injection traits (`Clock`) shared by every other
//! crate in the workspace.

pub mod environment;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod money;
pub mod order;

pub use environment::{Clock, FixedClock, SystemClock};
pub use error::DomainError;
pub use event_bus::{ConsumeOutcome, Delivery, EventBus, EventBusError, EventStream};
pub use money::Money;
pub use order::{Order, OrderItem, OrderStatus};
