//! Sales Orders domain module (event-sourced).
//!
//! Business rules for sales orders, including the sell-by-packaging rule on
//! order lines, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage).

pub mod order;
pub mod packaging_rule;

pub use order::{
    AddLine, ChangeLineProduct, ConfirmOrder, CreateSalesOrder, LineAdded, LineProductChanged,
    LineUpdated, MarkInvoiced, OrderConfirmed, OrderInvoiced, OrderLine, SalesOrder,
    SalesOrderCommand, SalesOrderCreated, SalesOrderEvent, SalesOrderId, SalesOrderStatus,
    UpdateLine,
};
pub use packaging_rule::{
    LineChanges, PackagingAssignment, PackagingChange, PackagingWarning, ResolvedLine,
};
