//! Read model builders.
//!
//! Projections consume committed events and build query-optimized read
//! models. They can be rebuilt from the event stream, are partitioned by
//! tenant and tolerate at-least-once delivery.

pub mod products;

pub use products::{ProductPackagingProjection, ProductPackagingReadModel, ProductProjectionError};
