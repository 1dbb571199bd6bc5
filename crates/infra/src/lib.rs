//! Infrastructure layer: event store, command dispatch, read models and the
//! order line service that wires the packaging rule to the product catalog.

pub mod command_dispatcher;
pub mod event_store;
pub mod order_lines;
pub mod projections;
pub mod read_model;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use order_lines::OrderLineService;
pub use projections::{ProductPackagingProjection, ProductPackagingReadModel};
