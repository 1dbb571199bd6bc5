//! Packagings and the selection rules built on them.

use serde::{Deserialize, Serialize};

use salepack_core::{Entity, ValueObject};

use crate::product::ProductId;

/// Packaging identifier, unique within its product (assigned 1, 2, 3, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackagingId(pub u32);

impl core::fmt::Display for PackagingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A named bundle quantity for a product (e.g. "Box of 15").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packaging {
    pub id: PackagingId,
    pub name: String,
    /// Units of the product per packaging. Always > 0.
    pub qty: i64,
    /// Only sellable packagings take part in order line selection.
    pub can_be_sold: bool,
}

impl Packaging {
    /// Number of packagings making up `quantity`, if it is an exact multiple.
    pub fn multiple_of(&self, quantity: i64) -> Option<i64> {
        if self.qty <= 0 || quantity <= 0 || quantity % self.qty != 0 {
            return None;
        }
        Some(quantity / self.qty)
    }

    pub fn divides(&self, quantity: i64) -> bool {
        self.multiple_of(quantity).is_some()
    }
}

impl Entity for Packaging {
    type Id = PackagingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Snapshot of what the order line rule needs to know about a product.
///
/// Built from the `Product` aggregate or from the catalog read model and
/// carried inside sales commands, so sales order decisions stay pure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingPolicy {
    pub product_id: ProductId,
    pub sell_only_by_packaging: bool,
    pub packagings: Vec<Packaging>,
}

impl ValueObject for PackagingPolicy {}

impl PackagingPolicy {
    pub fn new(
        product_id: ProductId,
        sell_only_by_packaging: bool,
        packagings: Vec<Packaging>,
    ) -> Self {
        Self {
            product_id,
            sell_only_by_packaging,
            packagings,
        }
    }

    pub fn find(&self, id: PackagingId) -> Option<&Packaging> {
        self.packagings.iter().find(|p| p.id == id)
    }

    pub fn sellable(&self) -> impl Iterator<Item = &Packaging> {
        self.packagings.iter().filter(|p| p.can_be_sold)
    }

    pub fn has_sellable_packaging(&self) -> bool {
        self.sellable().next().is_some()
    }

    /// Best packaging for `quantity`: the largest sellable packaging whose
    /// quantity divides `quantity` exactly. Equal quantities resolve to the
    /// lowest packaging id.
    pub fn first_packaging_with_multiple_qty(&self, quantity: i64) -> Option<&Packaging> {
        self.sellable()
            .filter(|p| p.divides(quantity))
            .max_by(|a, b| a.qty.cmp(&b.qty).then(b.id.cmp(&a.id)))
    }

    /// True if some sellable packaging divides `quantity`.
    pub fn is_sellable_multiple(&self, quantity: i64) -> bool {
        self.first_packaging_with_multiple_qty(quantity).is_some()
    }

    /// Packaging proposed when a flagged product is picked on a line.
    pub fn smallest_sellable_packaging(&self) -> Option<&Packaging> {
        self.sellable().min_by_key(|p| (p.qty, p.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use salepack_core::AggregateId;

    fn pack(id: u32, qty: i64) -> Packaging {
        Packaging {
            id: PackagingId(id),
            name: format!("Pack of {qty}"),
            qty,
            can_be_sold: true,
        }
    }

    fn policy(packagings: Vec<Packaging>) -> PackagingPolicy {
        PackagingPolicy::new(ProductId::new(AggregateId::new()), true, packagings)
    }

    #[test]
    fn multiple_of_requires_exact_division() {
        let p = pack(1, 5);
        assert_eq!(p.multiple_of(10), Some(2));
        assert_eq!(p.multiple_of(5), Some(1));
        assert_eq!(p.multiple_of(3), None);
        assert_eq!(p.multiple_of(0), None);
        assert_eq!(p.multiple_of(-10), None);
    }

    #[test]
    fn largest_dividing_packaging_wins() {
        let policy = policy(vec![pack(1, 5), pack(2, 15)]);

        assert_eq!(policy.first_packaging_with_multiple_qty(30).unwrap().id, PackagingId(2));
        assert_eq!(policy.first_packaging_with_multiple_qty(10).unwrap().id, PackagingId(1));
        assert!(policy.first_packaging_with_multiple_qty(7).is_none());
    }

    #[test]
    fn equal_quantities_resolve_to_lowest_id() {
        let policy = policy(vec![pack(3, 6), pack(1, 6), pack(2, 2)]);
        assert_eq!(policy.first_packaging_with_multiple_qty(12).unwrap().id, PackagingId(1));
        assert_eq!(policy.smallest_sellable_packaging().unwrap().id, PackagingId(2));
    }

    #[test]
    fn unsellable_packagings_are_ignored() {
        let mut pallet = pack(2, 100);
        pallet.can_be_sold = false;
        let policy = policy(vec![pack(1, 10), pallet]);

        assert_eq!(policy.first_packaging_with_multiple_qty(200).unwrap().id, PackagingId(1));
        assert!(policy.find(PackagingId(2)).is_some());
        assert_eq!(policy.sellable().count(), 1);
    }

    #[test]
    fn empty_policy_has_nothing_to_offer() {
        let policy = policy(vec![]);
        assert!(!policy.has_sellable_packaging());
        assert!(!policy.is_sellable_multiple(10));
        assert!(policy.smallest_sellable_packaging().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// A selected packaging always divides the requested quantity, and no
        /// larger sellable packaging does.
        #[test]
        fn selected_packaging_divides_quantity(
            sizes in prop::collection::vec(1i64..50, 1..6),
            pick in 0usize..6,
            count in 1i64..40,
        ) {
            let packagings: Vec<Packaging> = sizes
                .iter()
                .enumerate()
                .map(|(i, qty)| pack(i as u32 + 1, *qty))
                .collect();
            let base = packagings[pick % packagings.len()].qty;
            let quantity = base * count;
            let policy = policy(packagings);

            let selected = policy.first_packaging_with_multiple_qty(quantity);
            prop_assert!(selected.is_some());
            let selected = selected.unwrap();
            prop_assert_eq!(quantity % selected.qty, 0);
            prop_assert!(selected.qty >= base);
            for p in policy.sellable() {
                if p.divides(quantity) {
                    prop_assert!(p.qty <= selected.qty);
                }
            }
        }
    }
}
