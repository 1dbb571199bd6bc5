//! Domain events and the mechanics to distribute them.
//!
//! - [`Event`]: what catalog and sales aggregates emit.
//! - [`EventEnvelope`]: tenant + stream metadata wrapped around a payload.
//! - [`EventBus`]: publish/subscribe after events were committed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
