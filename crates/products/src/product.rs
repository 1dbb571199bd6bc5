use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use salepack_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use salepack_events::Event;

use crate::packaging::{Packaging, PackagingId, PackagingPolicy};

/// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    sell_only_by_packaging: bool,
    packagings: Vec<Packaging>,
    next_packaging_id: u32,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            sell_only_by_packaging: false,
            packagings: Vec::new(),
            next_packaging_id: 1,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sell_only_by_packaging(&self) -> bool {
        self.sell_only_by_packaging
    }

    pub fn packagings(&self) -> &[Packaging] {
        &self.packagings
    }

    /// Snapshot consumed by the sales order line rule.
    pub fn packaging_policy(&self) -> PackagingPolicy {
        PackagingPolicy::new(self.id, self.sell_only_by_packaging, self.packagings.clone())
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPackaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPackaging {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub qty: i64,
    pub can_be_sold: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemovePackaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePackaging {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub packaging_id: PackagingId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetSellOnlyByPackaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSellOnlyByPackaging {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub enabled: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    AddPackaging(AddPackaging),
    RemovePackaging(RemovePackaging),
    SetSellOnlyByPackaging(SetSellOnlyByPackaging),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackagingAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingAdded {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub packaging_id: PackagingId,
    pub name: String,
    pub qty: i64,
    pub can_be_sold: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackagingRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingRemoved {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub packaging_id: PackagingId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SellOnlyByPackagingChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellOnlyByPackagingChanged {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub enabled: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    PackagingAdded(PackagingAdded),
    PackagingRemoved(PackagingRemoved),
    SellOnlyByPackagingChanged(SellOnlyByPackagingChanged),
}

impl ProductEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            ProductEvent::ProductCreated(e) => e.tenant_id,
            ProductEvent::PackagingAdded(e) => e.tenant_id,
            ProductEvent::PackagingRemoved(e) => e.tenant_id,
            ProductEvent::SellOnlyByPackagingChanged(e) => e.tenant_id,
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            ProductEvent::ProductCreated(e) => e.product_id,
            ProductEvent::PackagingAdded(e) => e.product_id,
            ProductEvent::PackagingRemoved(e) => e.product_id,
            ProductEvent::SellOnlyByPackagingChanged(e) => e.product_id,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::PackagingAdded(_) => "products.product.packaging_added",
            ProductEvent::PackagingRemoved(_) => "products.product.packaging_removed",
            ProductEvent::SellOnlyByPackagingChanged(_) => {
                "products.product.sell_only_by_packaging_changed"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::PackagingAdded(e) => e.occurred_at,
            ProductEvent::PackagingRemoved(e) => e.occurred_at,
            ProductEvent::SellOnlyByPackagingChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.sell_only_by_packaging = false;
                self.packagings.clear();
                self.next_packaging_id = 1;
                self.created = true;
            }
            ProductEvent::PackagingAdded(e) => {
                self.packagings.push(Packaging {
                    id: e.packaging_id,
                    name: e.name.clone(),
                    qty: e.qty,
                    can_be_sold: e.can_be_sold,
                });
                self.next_packaging_id = self.next_packaging_id.max(e.packaging_id.0 + 1);
            }
            ProductEvent::PackagingRemoved(e) => {
                self.packagings.retain(|p| p.id != e.packaging_id);
            }
            ProductEvent::SellOnlyByPackagingChanged(e) => {
                self.sell_only_by_packaging = e.enabled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::AddPackaging(cmd) => self.handle_add_packaging(cmd),
            ProductCommand::RemovePackaging(cmd) => self.handle_remove_packaging(cmd),
            ProductCommand::SetSellOnlyByPackaging(cmd) => self.handle_set_flag(cmd),
        }
    }
}

impl Product {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_product_id(product_id)
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.clone(),
            name: cmd.name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_packaging(&self, cmd: &AddPackaging) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("packaging name cannot be empty"));
        }

        if cmd.qty <= 0 {
            return Err(DomainError::validation("packaging quantity must be positive"));
        }

        if self.packagings.iter().any(|p| p.name == name) {
            return Err(DomainError::conflict(format!(
                "packaging '{name}' already exists for this product"
            )));
        }

        Ok(vec![ProductEvent::PackagingAdded(PackagingAdded {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            packaging_id: PackagingId(self.next_packaging_id),
            name: name.to_string(),
            qty: cmd.qty,
            can_be_sold: cmd.can_be_sold,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_packaging(
        &self,
        cmd: &RemovePackaging,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;

        let removed = self
            .packagings
            .iter()
            .find(|p| p.id == cmd.packaging_id)
            .ok_or_else(DomainError::not_found)?;

        if self.sell_only_by_packaging && removed.can_be_sold {
            let other_sellable = self
                .packagings
                .iter()
                .any(|p| p.id != removed.id && p.can_be_sold);
            if !other_sellable {
                return Err(DomainError::invariant(
                    "a product sold only by packaging needs at least one sellable packaging",
                ));
            }
        }

        Ok(vec![ProductEvent::PackagingRemoved(PackagingRemoved {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            packaging_id: cmd.packaging_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_flag(
        &self,
        cmd: &SetSellOnlyByPackaging,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;

        if self.sell_only_by_packaging == cmd.enabled {
            return Err(DomainError::conflict(if cmd.enabled {
                "sell only by packaging is already enabled"
            } else {
                "sell only by packaging is already disabled"
            }));
        }

        if cmd.enabled && !self.packagings.iter().any(|p| p.can_be_sold) {
            return Err(DomainError::invariant(
                "a product sold only by packaging needs at least one sellable packaging",
            ));
        }

        Ok(vec![ProductEvent::SellOnlyByPackagingChanged(
            SellOnlyByPackagingChanged {
                tenant_id: cmd.tenant_id,
                product_id: cmd.product_id,
                enabled: cmd.enabled,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_product(tenant_id: TenantId, product_id: ProductId) -> Product {
        let mut product = Product::empty(product_id);
        let cmd = CreateProduct {
            tenant_id,
            product_id,
            sku: "SKU-001".to_string(),
            name: "Test Product".to_string(),
            occurred_at: test_time(),
        };
        let events = product.handle(&ProductCommand::CreateProduct(cmd)).unwrap();
        product.apply(&events[0]);
        product
    }

    fn add_packaging(product: &mut Product, name: &str, qty: i64, can_be_sold: bool) -> PackagingId {
        let cmd = AddPackaging {
            tenant_id: product.tenant_id().unwrap(),
            product_id: product.id_typed(),
            name: name.to_string(),
            qty,
            can_be_sold,
            occurred_at: test_time(),
        };
        let events = product.handle(&ProductCommand::AddPackaging(cmd)).unwrap();
        product.apply(&events[0]);
        match &events[0] {
            ProductEvent::PackagingAdded(e) => e.packaging_id,
            _ => panic!("Expected PackagingAdded event"),
        }
    }

    fn set_flag(product: &Product, enabled: bool) -> Result<Vec<ProductEvent>, DomainError> {
        product.handle(&ProductCommand::SetSellOnlyByPackaging(SetSellOnlyByPackaging {
            tenant_id: product.tenant_id().unwrap(),
            product_id: product.id_typed(),
            enabled,
            occurred_at: test_time(),
        }))
    }

    #[test]
    fn create_product_emits_product_created_event() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = Product::empty(product_id);
        let cmd = CreateProduct {
            tenant_id,
            product_id,
            sku: "SKU-001".to_string(),
            name: "Test Product".to_string(),
            occurred_at: test_time(),
        };

        let events = product.handle(&ProductCommand::CreateProduct(cmd)).unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ProductEvent::ProductCreated(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.product_id, product_id);
                assert_eq!(e.sku, "SKU-001");
                assert_eq!(e.name, "Test Product");
            }
            _ => panic!("Expected ProductCreated event"),
        }
    }

    #[test]
    fn new_product_is_not_sold_by_packaging() {
        let product = created_product(test_tenant_id(), test_product_id());
        assert!(!product.sell_only_by_packaging());
        assert!(product.packagings().is_empty());
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn create_product_rejects_blank_name_and_sku() {
        let product = Product::empty(test_product_id());
        let mut cmd = CreateProduct {
            tenant_id: test_tenant_id(),
            product_id: test_product_id(),
            sku: "SKU-001".to_string(),
            name: "   ".to_string(),
            occurred_at: test_time(),
        };
        let err = product.handle(&ProductCommand::CreateProduct(cmd.clone())).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        cmd.name = "Test Product".to_string();
        cmd.sku = " ".to_string();
        let err = product.handle(&ProductCommand::CreateProduct(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_product_rejects_duplicate_creation() {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let product = created_product(tenant_id, product_id);

        let err = product
            .handle(&ProductCommand::CreateProduct(CreateProduct {
                tenant_id,
                product_id,
                sku: "SKU-001".to_string(),
                name: "Test Product".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn packagings_get_sequential_ids() {
        let mut product = created_product(test_tenant_id(), test_product_id());

        let first = add_packaging(&mut product, "Test packaging", 5, true);
        let second = add_packaging(&mut product, "Test packaging 10", 15, true);

        assert_eq!(first, PackagingId(1));
        assert_eq!(second, PackagingId(2));
        assert_eq!(product.packagings().len(), 2);
        assert_eq!(product.packagings()[1].qty, 15);
    }

    #[test]
    fn packaging_ids_are_not_reused_after_removal() {
        let mut product = created_product(test_tenant_id(), test_product_id());
        let first = add_packaging(&mut product, "Box", 5, true);

        let events = product
            .handle(&ProductCommand::RemovePackaging(RemovePackaging {
                tenant_id: product.tenant_id().unwrap(),
                product_id: product.id_typed(),
                packaging_id: first,
                occurred_at: test_time(),
            }))
            .unwrap();
        product.apply(&events[0]);

        let next = add_packaging(&mut product, "Crate", 20, true);
        assert_eq!(next, PackagingId(2));
    }

    #[test]
    fn add_packaging_validates_quantity_and_name() {
        let mut product = created_product(test_tenant_id(), test_product_id());
        add_packaging(&mut product, "Box", 5, true);

        let base = AddPackaging {
            tenant_id: product.tenant_id().unwrap(),
            product_id: product.id_typed(),
            name: "Crate".to_string(),
            qty: 0,
            can_be_sold: true,
            occurred_at: test_time(),
        };

        let err = product.handle(&ProductCommand::AddPackaging(base.clone())).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let blank = AddPackaging {
            name: "  ".to_string(),
            qty: 10,
            ..base.clone()
        };
        let err = product.handle(&ProductCommand::AddPackaging(blank)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let duplicate = AddPackaging {
            name: "Box".to_string(),
            qty: 10,
            ..base
        };
        let err = product.handle(&ProductCommand::AddPackaging(duplicate)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn add_packaging_requires_existing_product() {
        let product = Product::empty(test_product_id());
        let err = product
            .handle(&ProductCommand::AddPackaging(AddPackaging {
                tenant_id: test_tenant_id(),
                product_id: product.id_typed(),
                name: "Box".to_string(),
                qty: 5,
                can_be_sold: true,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn enabling_flag_requires_sellable_packaging() {
        let mut product = created_product(test_tenant_id(), test_product_id());

        let err = set_flag(&product, true).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        add_packaging(&mut product, "Pallet", 500, false);
        let err = set_flag(&product, true).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        add_packaging(&mut product, "Box", 5, true);
        let events = set_flag(&product, true).unwrap();
        product.apply(&events[0]);
        assert!(product.sell_only_by_packaging());
        assert!(product.packaging_policy().sell_only_by_packaging);
    }

    #[test]
    fn setting_flag_to_current_value_conflicts() {
        let mut product = created_product(test_tenant_id(), test_product_id());
        add_packaging(&mut product, "Box", 5, true);

        let err = set_flag(&product, false).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let events = set_flag(&product, true).unwrap();
        product.apply(&events[0]);
        let err = set_flag(&product, true).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn last_sellable_packaging_of_flagged_product_cannot_be_removed() {
        let mut product = created_product(test_tenant_id(), test_product_id());
        let box_id = add_packaging(&mut product, "Box", 5, true);
        let events = set_flag(&product, true).unwrap();
        product.apply(&events[0]);

        let remove = RemovePackaging {
            tenant_id: product.tenant_id().unwrap(),
            product_id: product.id_typed(),
            packaging_id: box_id,
            occurred_at: test_time(),
        };
        let err = product
            .handle(&ProductCommand::RemovePackaging(remove.clone()))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        add_packaging(&mut product, "Crate", 20, true);
        let events = product.handle(&ProductCommand::RemovePackaging(remove)).unwrap();
        product.apply(&events[0]);
        assert_eq!(product.packagings().len(), 1);
        assert_eq!(product.packagings()[0].name, "Crate");
    }

    #[test]
    fn remove_unknown_packaging_is_not_found() {
        let product = created_product(test_tenant_id(), test_product_id());
        let err = product
            .handle(&ProductCommand::RemovePackaging(RemovePackaging {
                tenant_id: product.tenant_id().unwrap(),
                product_id: product.id_typed(),
                packaging_id: PackagingId(9),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn commands_from_other_tenant_are_rejected() {
        let product = created_product(test_tenant_id(), test_product_id());
        let err = product
            .handle(&ProductCommand::SetSellOnlyByPackaging(SetSellOnlyByPackaging {
                tenant_id: test_tenant_id(),
                product_id: product.id_typed(),
                enabled: true,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(msg) if msg.contains("tenant")));
    }

    #[test]
    fn packaging_policy_reflects_state() {
        let mut product = created_product(test_tenant_id(), test_product_id());
        add_packaging(&mut product, "Test packaging", 5, true);
        add_packaging(&mut product, "Test packaging 10", 15, true);

        let policy = product.packaging_policy();
        assert_eq!(policy.product_id, product.id_typed());
        assert!(!policy.sell_only_by_packaging);
        assert_eq!(
            policy.first_packaging_with_multiple_qty(30).unwrap().name,
            "Test packaging 10"
        );
    }
}
