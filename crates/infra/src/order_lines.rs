//! Application service for order lines of products sold by packaging.
//!
//! Commands on sales orders need the packaging policy of the product on the
//! line. The service reads it from the catalog projection, attaches it to the
//! command and dispatches. Product commands go through the same dispatcher and
//! their committed events feed the projection.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use salepack_core::{AggregateId, TenantId};
use salepack_events::{EventBus, EventEnvelope, InMemoryEventBus};
use salepack_products::{
    AddPackaging, CreateProduct, PackagingId, PackagingPolicy, Product, ProductCommand,
    ProductEvent, ProductId, RemovePackaging, SetSellOnlyByPackaging,
};
use salepack_sales::{
    AddLine, ChangeLineProduct, ConfirmOrder, CreateSalesOrder, LineChanges, MarkInvoiced,
    OrderLine, PackagingWarning, SalesOrder, SalesOrderCommand, SalesOrderEvent, SalesOrderId,
    UpdateLine,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::projections::products::PRODUCT_AGGREGATE_TYPE;
use crate::projections::{ProductPackagingProjection, ProductPackagingReadModel};
use crate::read_model::InMemoryTenantStore;

pub const SALES_ORDER_AGGREGATE_TYPE: &str = "sales.order";

pub type InMemoryProductStore = InMemoryTenantStore<ProductId, ProductPackagingReadModel>;
pub type JsonEventBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

#[derive(Debug)]
pub struct OrderLineService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    products: ProductPackagingProjection<InMemoryProductStore>,
}

impl OrderLineService<Arc<InMemoryEventStore>, Arc<JsonEventBus>> {
    /// Service over a fresh in-memory store and bus.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventStore::new()), Arc::new(JsonEventBus::new()))
    }
}

impl<S, B> OrderLineService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            products: ProductPackagingProjection::new(InMemoryTenantStore::new()),
        }
    }

    pub fn products(&self) -> &ProductPackagingProjection<InMemoryProductStore> {
        &self.products
    }

    pub fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductPackagingReadModel> {
        self.products.get(tenant_id, &product_id)
    }

    pub fn create_product(
        &self,
        tenant_id: TenantId,
        sku: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<ProductId, DispatchError> {
        let product_id = ProductId::new(AggregateId::new());
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::CreateProduct(CreateProduct {
                tenant_id,
                product_id,
                sku: sku.into(),
                name: name.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(product_id)
    }

    pub fn add_packaging(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        name: impl Into<String>,
        qty: i64,
        can_be_sold: bool,
    ) -> Result<PackagingId, DispatchError> {
        let committed = self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::AddPackaging(AddPackaging {
                tenant_id,
                product_id,
                name: name.into(),
                qty,
                can_be_sold,
                occurred_at: Utc::now(),
            }),
        )?;

        committed
            .iter()
            .find_map(|stored| match decode::<ProductEvent>(stored) {
                Ok(ProductEvent::PackagingAdded(e)) => Some(Ok(e.packaging_id)),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .unwrap_or_else(|| {
                Err(DispatchError::InvariantViolation(
                    "packaging_added event missing".to_string(),
                ))
            })
    }

    pub fn remove_packaging(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        packaging_id: PackagingId,
    ) -> Result<(), DispatchError> {
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::RemovePackaging(RemovePackaging {
                tenant_id,
                product_id,
                packaging_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn set_sell_only_by_packaging(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        enabled: bool,
    ) -> Result<(), DispatchError> {
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::SetSellOnlyByPackaging(SetSellOnlyByPackaging {
                tenant_id,
                product_id,
                enabled,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn create_order(&self, tenant_id: TenantId) -> Result<SalesOrderId, DispatchError> {
        let order_id = SalesOrderId::new(AggregateId::new());
        self.dispatch_order(
            tenant_id,
            order_id,
            SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(order_id)
    }

    /// Add a line; for a product sold by packaging the packaging is selected
    /// automatically unless `packaging` names one.
    pub fn add_line(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        product_id: ProductId,
        quantity: i64,
        unit_price: u64,
        packaging: Option<PackagingId>,
    ) -> Result<OrderLine, DispatchError> {
        let policy = self.policy(tenant_id, product_id)?;
        let committed = self.dispatch_order(
            tenant_id,
            order_id,
            SalesOrderCommand::AddLine(AddLine {
                tenant_id,
                order_id,
                product_id,
                quantity,
                unit_price,
                packaging,
                policy,
                occurred_at: Utc::now(),
            }),
        )?;

        let line_no = committed
            .iter()
            .find_map(|stored| match decode::<SalesOrderEvent>(stored) {
                Ok(SalesOrderEvent::LineAdded(e)) => Some(Ok(e.line_no)),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .unwrap_or_else(|| {
                Err(DispatchError::InvariantViolation("line_added event missing".to_string()))
            })?;

        let line = self.load_line(tenant_id, order_id, line_no)?;
        log_selection(order_id, &line);
        Ok(line)
    }

    pub fn update_line(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        line_no: u32,
        changes: LineChanges,
    ) -> Result<OrderLine, DispatchError> {
        let current = self.load_line(tenant_id, order_id, line_no)?;
        let policy = self.policy(tenant_id, current.product_id)?;

        self.dispatch_order(
            tenant_id,
            order_id,
            SalesOrderCommand::UpdateLine(UpdateLine {
                tenant_id,
                order_id,
                line_no,
                changes,
                policy,
                occurred_at: Utc::now(),
            }),
        )?;

        let line = self.load_line(tenant_id, order_id, line_no)?;
        log_selection(order_id, &line);
        Ok(line)
    }

    pub fn change_line_product(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        line_no: u32,
        product_id: ProductId,
    ) -> Result<OrderLine, DispatchError> {
        let policy = self.policy(tenant_id, product_id)?;

        self.dispatch_order(
            tenant_id,
            order_id,
            SalesOrderCommand::ChangeLineProduct(ChangeLineProduct {
                tenant_id,
                order_id,
                line_no,
                product_id,
                policy,
                occurred_at: Utc::now(),
            }),
        )?;

        self.load_line(tenant_id, order_id, line_no)
    }

    pub fn confirm_order(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<(), DispatchError> {
        self.dispatch_order(
            tenant_id,
            order_id,
            SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn mark_invoiced(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<(), DispatchError> {
        self.dispatch_order(
            tenant_id,
            order_id,
            SalesOrderCommand::MarkInvoiced(MarkInvoiced {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Quantity onchange for a line being edited: a warning, never an error,
    /// when `quantity` is not a whole number of sellable packagings.
    pub fn preview_line_quantity(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Option<PackagingWarning>, DispatchError> {
        let policy = self.policy(tenant_id, product_id)?;
        let warning = salepack_sales::packaging_rule::check_quantity(&policy, quantity);
        log_warning(product_id, quantity, warning.as_ref());
        Ok(warning)
    }

    /// Quantity onchange for an existing line of an order.
    pub fn check_line_quantity(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        line_no: u32,
        quantity: i64,
    ) -> Result<Option<PackagingWarning>, DispatchError> {
        let order = self.load_order(tenant_id, order_id)?;
        let line = order.line(line_no).ok_or(DispatchError::NotFound)?;
        let product_id = line.product_id;
        let policy = self.policy(tenant_id, product_id)?;

        let warning = order.check_line_quantity(line_no, quantity, &policy)?;
        log_warning(product_id, quantity, warning.as_ref());
        Ok(warning)
    }

    pub fn load_order(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<SalesOrder, DispatchError> {
        let order = self
            .dispatcher
            .load(tenant_id, order_id.0, |_, id| SalesOrder::empty(SalesOrderId::new(id)))?;
        if order.tenant_id().is_none() {
            return Err(DispatchError::NotFound);
        }
        Ok(order)
    }

    pub fn load_product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Product, DispatchError> {
        let product = self
            .dispatcher
            .load(tenant_id, product_id.0, |_, id| Product::empty(ProductId::new(id)))?;
        if product.tenant_id().is_none() {
            return Err(DispatchError::NotFound);
        }
        Ok(product)
    }

    fn load_line(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        line_no: u32,
    ) -> Result<OrderLine, DispatchError> {
        self.load_order(tenant_id, order_id)?
            .line(line_no)
            .cloned()
            .ok_or(DispatchError::NotFound)
    }

    fn policy(&self, tenant_id: TenantId, product_id: ProductId) -> Result<PackagingPolicy, DispatchError> {
        self.products
            .policy(tenant_id, product_id)
            .ok_or(DispatchError::NotFound)
    }

    fn dispatch_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        command: ProductCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed = self.dispatcher.dispatch(
            tenant_id,
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            command,
            |_, id| Product::empty(ProductId::new(id)),
        )?;

        for stored in &committed {
            if let Err(err) = self.products.apply_envelope(&stored.to_envelope()) {
                warn!(
                    tenant = %tenant_id,
                    product = %product_id,
                    sequence = stored.sequence_number,
                    error = %err,
                    "failed to project product event, rebuilding from the stream"
                );
                self.refresh_product(tenant_id, product_id)?;
                break;
            }
        }

        Ok(committed)
    }

    /// Rebuild a product's catalog entry from its event stream.
    pub fn refresh_product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<(), DispatchError> {
        let stream = self.dispatcher.store().load_stream(tenant_id, product_id.0)?;
        self.products
            .rebuild_stream(tenant_id, product_id.0, stream.iter().map(StoredEvent::to_envelope))
            .map_err(|e| DispatchError::Projection(e.to_string()))
    }

    fn dispatch_order(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        command: SalesOrderCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch(
            tenant_id,
            order_id.0,
            SALES_ORDER_AGGREGATE_TYPE,
            command,
            |_, id| SalesOrder::empty(SalesOrderId::new(id)),
        )
    }
}

fn decode<E: serde::de::DeserializeOwned>(stored: &StoredEvent) -> Result<E, DispatchError> {
    serde_json::from_value(stored.payload.clone()).map_err(|e| DispatchError::Deserialize(e.to_string()))
}

fn log_selection(order_id: SalesOrderId, line: &OrderLine) {
    debug!(
        order = %order_id,
        line_no = line.line_no,
        quantity = line.quantity,
        packaging = ?line.packaging_id(),
        packaging_qty = ?line.packaging_qty(),
        "order line packaging resolved"
    );
}

fn log_warning(product_id: ProductId, quantity: i64, warning: Option<&PackagingWarning>) {
    match warning {
        Some(w) => warn!(product = %product_id, quantity, message = %w.message, "{}", w.title),
        None => debug!(product = %product_id, quantity, "quantity fits packaging rule"),
    }
}
