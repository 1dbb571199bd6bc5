//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// A value object has no identity of its own: two instances holding the same
/// attributes are interchangeable. A packaging assignment on an order line
/// (`packaging #2 "Box of 15" x 3`) is a value object; the order line that
/// carries it is an entity.
///
/// Value objects are replaced, never mutated in place.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
