//! Sell-by-packaging rule for order lines.
//!
//! When a product is flagged `sell_only_by_packaging`, an order line must be a
//! whole number of one of the product's sellable packagings. The functions
//! here are pure: they read a [`PackagingPolicy`] snapshot and the line's
//! current state and either return the quantity/packaging to persist or reject
//! the write with [`DomainError::Validation`].
//!
//! Three hooks mirror the life of a line:
//! - [`check_quantity`]: interactive quantity change, warns without blocking.
//! - [`resolve_on_create`] / [`resolve_on_write`]: persist time, auto-selects
//!   the packaging or rejects.
//! - [`resolve_on_product_change`]: a product is (re)picked on a line.

use serde::{Deserialize, Serialize};

use salepack_core::{DomainError, DomainResult, ValueObject};
use salepack_products::{Packaging, PackagingId, PackagingPolicy};

/// Packaging stored on an order line, with the number of packagings ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingAssignment {
    pub packaging_id: PackagingId,
    pub name: String,
    /// Units per packaging at the time the line was written.
    pub unit_qty: i64,
    /// Number of packagings; `count * unit_qty` is the line quantity.
    pub count: i64,
}

impl ValueObject for PackagingAssignment {}

impl PackagingAssignment {
    /// Assign `packaging` to `quantity`, if `quantity` is a whole number of it.
    pub fn for_quantity(packaging: &Packaging, quantity: i64) -> Option<Self> {
        packaging.multiple_of(quantity).map(|count| Self {
            packaging_id: packaging.id,
            name: packaging.name.clone(),
            unit_qty: packaging.qty,
            count,
        })
    }

    pub fn quantity(&self) -> i64 {
        self.unit_qty * self.count
    }

    /// Same packaging, new quantity. `None` when it no longer divides.
    fn rescaled(&self, quantity: i64) -> Option<Self> {
        if self.unit_qty <= 0 || quantity <= 0 || quantity % self.unit_qty != 0 {
            return None;
        }
        Some(Self {
            count: quantity / self.unit_qty,
            ..self.clone()
        })
    }
}

/// Non-blocking warning returned by the quantity onchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingWarning {
    pub title: String,
    pub message: String,
}

/// What a write does to the line's packaging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "packaging_id")]
pub enum PackagingChange {
    #[default]
    Keep,
    Clear,
    Set(PackagingId),
}

/// Field changes written to an existing line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChanges {
    pub quantity: Option<i64>,
    pub packaging: PackagingChange,
    /// Number of packagings; the quantity follows from it.
    pub packaging_qty: Option<i64>,
}

impl LineChanges {
    pub fn quantity(quantity: i64) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::default()
        }
    }

    pub fn packaging(packaging_id: PackagingId) -> Self {
        Self {
            packaging: PackagingChange::Set(packaging_id),
            ..Self::default()
        }
    }

    pub fn clear_packaging() -> Self {
        Self {
            packaging: PackagingChange::Clear,
            ..Self::default()
        }
    }

    pub fn packaging_qty(count: i64) -> Self {
        Self {
            packaging_qty: Some(count),
            ..Self::default()
        }
    }

    pub fn with_packaging(mut self, packaging_id: PackagingId) -> Self {
        self.packaging = PackagingChange::Set(packaging_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.quantity.is_none()
            && self.packaging_qty.is_none()
            && self.packaging == PackagingChange::Keep
    }
}

/// Quantity and packaging a line ends up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub quantity: i64,
    pub packaging: Option<PackagingAssignment>,
}

/// Quantity onchange: warn when a flagged product is not ordered in whole
/// sellable packagings. Never blocks.
pub fn check_quantity(policy: &PackagingPolicy, quantity: i64) -> Option<PackagingWarning> {
    if !policy.sell_only_by_packaging || policy.is_sellable_multiple(quantity) {
        return None;
    }

    let offered = policy
        .sellable()
        .map(|p| format!("{} ({})", p.name, p.qty))
        .collect::<Vec<_>>();
    let offered = if offered.is_empty() {
        "none".to_string()
    } else {
        offered.join(", ")
    };

    Some(PackagingWarning {
        title: "Product sold only by packaging".to_string(),
        message: format!(
            "Quantity {quantity} is not a multiple of any packaging of this product. \
             Sellable packagings: {offered}."
        ),
    })
}

/// Persist-time rule for a new line.
pub fn resolve_on_create(
    policy: &PackagingPolicy,
    quantity: i64,
    packaging: Option<PackagingId>,
) -> DomainResult<ResolvedLine> {
    ensure_positive(quantity)?;

    let packaging = match packaging {
        Some(id) => Some(assign_explicit(policy, id, quantity)?),
        None if policy.sell_only_by_packaging => Some(best_assignment(policy, quantity)?),
        None => None,
    };

    Ok(ResolvedLine { quantity, packaging })
}

/// Persist-time rule for a write to an existing line.
pub fn resolve_on_write(
    policy: &PackagingPolicy,
    current: &ResolvedLine,
    changes: &LineChanges,
) -> DomainResult<ResolvedLine> {
    if changes.packaging == PackagingChange::Clear && policy.sell_only_by_packaging {
        return Err(DomainError::validation(format!(
            "product {} is sold only by packaging; its packaging cannot be removed",
            policy.product_id
        )));
    }

    let explicit = match changes.packaging {
        PackagingChange::Set(id) => Some(lookup(policy, id)?),
        PackagingChange::Keep | PackagingChange::Clear => None,
    };

    if let Some(count) = changes.packaging_qty {
        return resolve_packaging_qty(policy, current, changes, explicit, count);
    }

    let quantity = changes.quantity.unwrap_or(current.quantity);
    ensure_positive(quantity)?;

    let packaging = match (explicit, changes.packaging) {
        (Some(p), _) => Some(assign(p, quantity)?),
        (None, PackagingChange::Clear) => None,
        (None, _) if changes.quantity.is_none() => current.packaging.clone(),
        (None, _) if policy.sell_only_by_packaging => Some(best_assignment(policy, quantity)?),
        (None, _) => current
            .packaging
            .as_ref()
            .and_then(|a| a.rescaled(quantity)),
    };

    Ok(ResolvedLine { quantity, packaging })
}

/// Product onchange suggestion: one unit of the smallest sellable packaging.
pub fn suggest_for_product(policy: &PackagingPolicy) -> Option<ResolvedLine> {
    if !policy.sell_only_by_packaging {
        return None;
    }
    let packaging = policy.smallest_sellable_packaging()?;
    Some(ResolvedLine {
        quantity: packaging.qty,
        packaging: PackagingAssignment::for_quantity(packaging, packaging.qty),
    })
}

/// Persist-time rule when a line switches to the product described by `policy`.
pub fn resolve_on_product_change(
    policy: &PackagingPolicy,
    current_quantity: i64,
) -> DomainResult<ResolvedLine> {
    if !policy.sell_only_by_packaging {
        ensure_positive(current_quantity)?;
        return Ok(ResolvedLine {
            quantity: current_quantity,
            packaging: None,
        });
    }

    suggest_for_product(policy).ok_or_else(|| {
        DomainError::validation(format!(
            "product {} is sold only by packaging but has no sellable packaging",
            policy.product_id
        ))
    })
}

fn resolve_packaging_qty(
    policy: &PackagingPolicy,
    current: &ResolvedLine,
    changes: &LineChanges,
    explicit: Option<&Packaging>,
    count: i64,
) -> DomainResult<ResolvedLine> {
    if count <= 0 {
        return Err(DomainError::validation("packaging quantity must be positive"));
    }

    // A kept packaging is re-read from the product: it may have been removed
    // or changed since the line was written.
    let packaging = match (explicit, changes.packaging, current.packaging.as_ref()) {
        (Some(p), _, _) => p,
        (None, PackagingChange::Keep, Some(a)) => lookup(policy, a.packaging_id)?,
        _ => {
            return Err(DomainError::validation(
                "a packaging quantity needs a packaging on the line",
            ));
        }
    };

    let base = PackagingAssignment {
        packaging_id: packaging.id,
        name: packaging.name.clone(),
        unit_qty: packaging.qty,
        count,
    };

    let quantity = base
        .unit_qty
        .checked_mul(count)
        .ok_or_else(|| DomainError::validation("packaging quantity is too large"))?;

    if let Some(requested) = changes.quantity {
        if requested != quantity {
            return Err(DomainError::validation(format!(
                "quantity {requested} does not match {count} x {} ({quantity})",
                base.name
            )));
        }
    }

    Ok(ResolvedLine {
        quantity,
        packaging: Some(base),
    })
}

fn ensure_positive(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

fn lookup(policy: &PackagingPolicy, id: PackagingId) -> DomainResult<&Packaging> {
    let packaging = policy.find(id).ok_or_else(|| {
        DomainError::validation(format!(
            "packaging {id} does not belong to product {}",
            policy.product_id
        ))
    })?;

    if policy.sell_only_by_packaging && !packaging.can_be_sold {
        return Err(DomainError::validation(format!(
            "packaging '{}' cannot be sold",
            packaging.name
        )));
    }

    Ok(packaging)
}

fn assign(packaging: &Packaging, quantity: i64) -> DomainResult<PackagingAssignment> {
    PackagingAssignment::for_quantity(packaging, quantity).ok_or_else(|| {
        DomainError::validation(format!(
            "quantity {quantity} is not a multiple of packaging '{}' ({})",
            packaging.name, packaging.qty
        ))
    })
}

fn assign_explicit(
    policy: &PackagingPolicy,
    id: PackagingId,
    quantity: i64,
) -> DomainResult<PackagingAssignment> {
    assign(lookup(policy, id)?, quantity)
}

fn best_assignment(policy: &PackagingPolicy, quantity: i64) -> DomainResult<PackagingAssignment> {
    let packaging = policy
        .first_packaging_with_multiple_qty(quantity)
        .ok_or_else(|| {
            DomainError::validation(format!(
                "product {} is sold only by packaging and quantity {quantity} \
                 is not a multiple of any sellable packaging",
                policy.product_id
            ))
        })?;
    assign(packaging, quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use salepack_core::AggregateId;
    use salepack_products::ProductId;

    fn pack(id: u32, name: &str, qty: i64) -> Packaging {
        Packaging {
            id: PackagingId(id),
            name: name.to_string(),
            qty,
            can_be_sold: true,
        }
    }

    fn policy(sell_only_by_packaging: bool) -> PackagingPolicy {
        PackagingPolicy::new(
            ProductId::new(AggregateId::new()),
            sell_only_by_packaging,
            vec![pack(1, "Test packaging", 5), pack(2, "Test packaging 10", 15)],
        )
    }

    fn line(quantity: i64, packaging: Option<PackagingAssignment>) -> ResolvedLine {
        ResolvedLine { quantity, packaging }
    }

    fn assigned(policy: &PackagingPolicy, id: u32, quantity: i64) -> PackagingAssignment {
        PackagingAssignment::for_quantity(policy.find(PackagingId(id)).unwrap(), quantity).unwrap()
    }

    #[test]
    fn onchange_warns_only_for_flagged_products() {
        assert!(check_quantity(&policy(false), 3).is_none());

        let flagged = policy(true);
        let warning = check_quantity(&flagged, 3).unwrap();
        assert!(warning.message.contains("Quantity 3"));
        assert!(warning.message.contains("Test packaging (5)"));

        assert!(check_quantity(&flagged, 10).is_none());
        assert!(check_quantity(&flagged, 45).is_none());
    }

    #[test]
    fn onchange_ignores_unsellable_packagings() {
        let mut flagged = policy(true);
        flagged.packagings.push(Packaging {
            can_be_sold: false,
            ..pack(3, "Pallet", 7)
        });
        assert!(check_quantity(&flagged, 14).is_some());
    }

    #[test]
    fn create_selects_packaging_for_flagged_product() {
        let flagged = policy(true);
        let resolved = resolve_on_create(&flagged, 10, None).unwrap();

        let packaging = resolved.packaging.unwrap();
        assert_eq!(packaging.name, "Test packaging");
        assert_eq!(packaging.count, 2);
        assert_eq!(packaging.quantity(), 10);
    }

    #[test]
    fn create_prefers_largest_packaging() {
        let resolved = resolve_on_create(&policy(true), 30, None).unwrap();
        let packaging = resolved.packaging.unwrap();
        assert_eq!(packaging.packaging_id, PackagingId(2));
        assert_eq!(packaging.count, 2);
    }

    #[test]
    fn create_rejects_non_multiple_for_flagged_product() {
        let err = resolve_on_create(&policy(true), 2, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn create_leaves_unflagged_product_alone() {
        let resolved = resolve_on_create(&policy(false), 10, None).unwrap();
        assert_eq!(resolved, line(10, None));

        let resolved = resolve_on_create(&policy(false), 3, None).unwrap();
        assert_eq!(resolved, line(3, None));
    }

    #[test]
    fn create_honours_explicit_packaging() {
        let flagged = policy(true);
        let resolved = resolve_on_create(&flagged, 30, Some(PackagingId(1))).unwrap();
        assert_eq!(resolved.packaging.unwrap().count, 6);

        let err = resolve_on_create(&flagged, 20, Some(PackagingId(2))).unwrap_err();
        assert!(err.is_validation());

        let err = resolve_on_create(&flagged, 20, Some(PackagingId(9))).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn create_rejects_non_positive_quantity() {
        assert!(resolve_on_create(&policy(false), 0, None).unwrap_err().is_validation());
        assert!(resolve_on_create(&policy(true), -5, None).unwrap_err().is_validation());
    }

    #[test]
    fn write_quantity_reassigns_packaging() {
        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));

        let resolved = resolve_on_write(&flagged, &current, &LineChanges::quantity(30)).unwrap();
        let packaging = resolved.packaging.unwrap();
        assert_eq!(resolved.quantity, 30);
        assert_eq!(packaging.name, "Test packaging 10");
        assert_eq!(packaging.count, 2);
    }

    #[test]
    fn write_quantity_rejects_non_multiple() {
        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));

        let err = resolve_on_write(&flagged, &current, &LineChanges::quantity(3)).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn clearing_packaging_of_flagged_product_fails() {
        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));

        let err = resolve_on_write(&flagged, &current, &LineChanges::clear_packaging()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn clearing_packaging_of_unflagged_product_succeeds() {
        let unflagged = policy(false);
        let current = line(10, Some(assigned(&unflagged, 1, 10)));

        let resolved =
            resolve_on_write(&unflagged, &current, &LineChanges::clear_packaging()).unwrap();
        assert_eq!(resolved, line(10, None));
    }

    #[test]
    fn unflagged_quantity_write_keeps_or_drops_packaging() {
        let unflagged = policy(false);
        let current = line(10, Some(assigned(&unflagged, 1, 10)));

        let kept = resolve_on_write(&unflagged, &current, &LineChanges::quantity(25)).unwrap();
        assert_eq!(kept.packaging.unwrap().count, 5);

        let dropped = resolve_on_write(&unflagged, &current, &LineChanges::quantity(7)).unwrap();
        assert_eq!(dropped, line(7, None));
    }

    #[test]
    fn write_without_quantity_is_not_retroactive() {
        let flagged = policy(true);
        let current = line(3, None);

        let resolved = resolve_on_write(&flagged, &current, &LineChanges::default()).unwrap();
        assert_eq!(resolved, current);
    }

    #[test]
    fn packaging_qty_drives_quantity() {
        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));

        let resolved = resolve_on_write(&flagged, &current, &LineChanges::packaging_qty(6)).unwrap();
        assert_eq!(resolved.quantity, 30);
        let packaging = resolved.packaging.unwrap();
        assert_eq!(packaging.packaging_id, PackagingId(1));
        assert_eq!(packaging.count, 6);

        let changes = LineChanges::packaging_qty(3).with_packaging(PackagingId(2));
        let resolved = resolve_on_write(&flagged, &current, &changes).unwrap();
        assert_eq!(resolved.quantity, 45);
    }

    #[test]
    fn packaging_qty_rejects_a_packaging_the_product_no_longer_has() {
        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));
        let without_first = PackagingPolicy::new(
            flagged.product_id,
            true,
            vec![pack(2, "Test packaging 10", 15)],
        );

        let err = resolve_on_write(&without_first, &current, &LineChanges::packaging_qty(3))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn packaging_qty_uses_the_current_packaging_definition() {
        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));
        let renamed = PackagingPolicy::new(
            flagged.product_id,
            true,
            vec![pack(1, "Half dozen", 6), pack(2, "Test packaging 10", 15)],
        );

        let resolved = resolve_on_write(&renamed, &current, &LineChanges::packaging_qty(2)).unwrap();
        assert_eq!(resolved.quantity, 12);
        let packaging = resolved.packaging.unwrap();
        assert_eq!(packaging.name, "Half dozen");
        assert_eq!(packaging.unit_qty, 6);
    }

    #[test]
    fn packaging_qty_needs_packaging_and_consistent_quantity() {
        let unflagged = policy(false);
        let err = resolve_on_write(&unflagged, &line(10, None), &LineChanges::packaging_qty(2))
            .unwrap_err();
        assert!(err.is_validation());

        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));
        let changes = LineChanges {
            quantity: Some(11),
            packaging_qty: Some(2),
            ..LineChanges::default()
        };
        assert!(resolve_on_write(&flagged, &current, &changes).unwrap_err().is_validation());

        let err = resolve_on_write(&flagged, &current, &LineChanges::packaging_qty(0)).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn explicit_packaging_write_must_divide() {
        let flagged = policy(true);
        let current = line(10, Some(assigned(&flagged, 1, 10)));

        let err = resolve_on_write(&flagged, &current, &LineChanges::packaging(PackagingId(2)))
            .unwrap_err();
        assert!(err.is_validation());

        let changes = LineChanges {
            quantity: Some(15),
            ..LineChanges::packaging(PackagingId(1))
        };
        let resolved = resolve_on_write(&flagged, &current, &changes).unwrap();
        assert_eq!(resolved.packaging.unwrap().count, 3);
    }

    #[test]
    fn product_change_suggests_smallest_packaging() {
        let flagged = policy(true);
        let resolved = resolve_on_product_change(&flagged, 1).unwrap();
        assert_eq!(resolved.quantity, 5);
        assert_eq!(resolved.packaging.unwrap().count, 1);
        assert!(check_quantity(&flagged, resolved.quantity).is_none());

        let unflagged = policy(false);
        assert!(suggest_for_product(&unflagged).is_none());
        assert_eq!(resolve_on_product_change(&unflagged, 4).unwrap(), line(4, None));
    }

    #[test]
    fn product_change_without_sellable_packaging_fails() {
        let empty = PackagingPolicy::new(ProductId::new(AggregateId::new()), true, vec![]);
        assert!(resolve_on_product_change(&empty, 1).unwrap_err().is_validation());
    }

    proptest! {
        /// Whatever gets persisted for a flagged product is a whole number of
        /// the recorded packaging.
        #[test]
        fn persisted_flagged_lines_are_whole_packagings(quantity in 1i64..500) {
            let flagged = policy(true);
            match resolve_on_create(&flagged, quantity, None) {
                Ok(resolved) => {
                    let packaging = resolved.packaging.unwrap();
                    prop_assert_eq!(packaging.quantity(), quantity);
                    prop_assert!(packaging.count >= 1);
                }
                Err(err) => {
                    prop_assert!(err.is_validation());
                    prop_assert!(quantity % 5 != 0);
                }
            }
        }
    }
}
