//! Entity trait: identity that survives state changes.
//!
//! Packagings inside a product and lines inside a sales order are entities:
//! they are addressed by an identifier local to their aggregate, while their
//! attributes (quantity, name, assigned packaging) may change over time.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Identifier, unique within the owning aggregate.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
