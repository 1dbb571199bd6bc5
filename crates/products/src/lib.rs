//! Product catalog domain module (event-sourced).
//!
//! Products, their packagings and the "sell only by packaging" flag,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod packaging;
pub mod product;

pub use packaging::{Packaging, PackagingId, PackagingPolicy};
pub use product::{
    AddPackaging, CreateProduct, PackagingAdded, PackagingRemoved, Product, ProductCommand,
    ProductCreated, ProductEvent, ProductId, RemovePackaging, SellOnlyByPackagingChanged,
    SetSellOnlyByPackaging,
};
