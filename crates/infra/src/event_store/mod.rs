//! Append-only event store boundary.
//!
//! Tenant-scoped event streams, one per aggregate, with no storage
//! assumptions beyond what [`EventStore`] promises.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
