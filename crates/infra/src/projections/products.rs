use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use salepack_core::{AggregateId, TenantId};
use salepack_events::EventEnvelope;
use salepack_products::{Packaging, PackagingPolicy, ProductEvent, ProductId};

use crate::read_model::TenantStore;

pub const PRODUCT_AGGREGATE_TYPE: &str = "products.product";

/// Product as seen by the order line rule: identity plus its packaging policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPackagingReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub policy: PackagingPolicy,
}

impl ProductPackagingReadModel {
    fn placeholder(product_id: ProductId) -> Self {
        Self {
            product_id,
            sku: String::new(),
            name: String::new(),
            policy: PackagingPolicy::new(product_id, false, vec![]),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ProductProjectionError {
    #[error("failed to deserialize product event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection cursor lock poisoned")]
    Poisoned,
}

/// Builds [`ProductPackagingReadModel`]s from product events.
///
/// Replayed envelopes (sequence at or below the cursor) are skipped; a gap in
/// a stream is an error until [`ProductPackagingProjection::rebuild_stream`]
/// catches the product up.
#[derive(Debug)]
pub struct ProductPackagingProjection<S>
where
    S: TenantStore<ProductId, ProductPackagingReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> ProductPackagingProjection<S>
where
    S: TenantStore<ProductId, ProductPackagingReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductPackagingReadModel> {
        self.store.get(tenant_id, product_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductPackagingReadModel> {
        self.store.list(tenant_id)
    }

    /// Packaging policy snapshot for a product, if the product is known.
    pub fn policy(&self, tenant_id: TenantId, product_id: ProductId) -> Option<PackagingPolicy> {
        self.store.get(tenant_id, &product_id).map(|rm| rm.policy)
    }

    /// Apply one envelope. The cursor lock is held until the read model and
    /// the cursor are both written, so concurrent callers see either all of
    /// an event or none of it.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProductProjectionError> {
        if envelope.aggregate_type() != PRODUCT_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let key = CursorKey { tenant_id, aggregate_id };

        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| ProductProjectionError::Poisoned)?;

        let last = cursors.get(&key).copied().unwrap_or(0);
        if seq == 0 {
            return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            debug!(tenant = %tenant_id, aggregate = %aggregate_id, seq, "skipping replayed envelope");
            return Ok(());
        }
        if seq != last + 1 {
            return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let (product_id, ev) = decode_checked(envelope)?;
        let rm = fold(self.store.get(tenant_id, &product_id), product_id, ev);

        self.store.upsert(tenant_id, product_id, rm);
        cursors.insert(key, seq);
        Ok(())
    }

    /// Rebuild one product from its complete stream.
    ///
    /// Used to recover after an envelope was rejected (for example when two
    /// commits on the same product are projected out of order). The result is
    /// only stored if it is at least as recent as what is already projected.
    pub fn rebuild_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProductProjectionError> {
        let mut envs: Vec<_> = envelopes
            .into_iter()
            .filter(|e| {
                e.aggregate_type() == PRODUCT_AGGREGATE_TYPE
                    && e.tenant_id() == tenant_id
                    && e.aggregate_id() == aggregate_id
            })
            .collect();
        envs.sort_by_key(|e| e.sequence_number());

        let mut rebuilt: Option<(ProductId, ProductPackagingReadModel)> = None;
        let mut last = 0u64;
        for env in &envs {
            let seq = env.sequence_number();
            if seq != last + 1 {
                return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
            }
            let (product_id, ev) = decode_checked(env)?;
            let rm = fold(rebuilt.map(|(_, rm)| rm), product_id, ev);
            rebuilt = Some((product_id, rm));
            last = seq;
        }

        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| ProductProjectionError::Poisoned)?;

        let key = CursorKey { tenant_id, aggregate_id };
        if cursors.get(&key).copied().unwrap_or(0) > last {
            return Ok(());
        }
        if let Some((product_id, rm)) = rebuilt {
            self.store.upsert(tenant_id, product_id, rm);
            cursors.insert(key, last);
        }
        Ok(())
    }

    /// Clear the tenants present in `envelopes` and replay them in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProductProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
        tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
        tenants.dedup();
        for t in tenants {
            self.store.clear_tenant(t);
            self.clear_cursors(t);
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

/// Decode a product event and check it belongs to the envelope's stream.
fn decode_checked(
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(ProductId, ProductEvent), ProductProjectionError> {
    let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProductProjectionError::Deserialize(e.to_string()))?;

    if ev.tenant_id() != envelope.tenant_id() {
        return Err(ProductProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    let product_id = ev.product_id();
    if product_id.0 != envelope.aggregate_id() {
        return Err(ProductProjectionError::TenantIsolation(
            "event product_id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok((product_id, ev))
}

fn fold(
    current: Option<ProductPackagingReadModel>,
    product_id: ProductId,
    ev: ProductEvent,
) -> ProductPackagingReadModel {
    let mut rm = current.unwrap_or_else(|| ProductPackagingReadModel::placeholder(product_id));

    match ev {
        ProductEvent::ProductCreated(e) => {
            rm = ProductPackagingReadModel {
                product_id: e.product_id,
                sku: e.sku,
                name: e.name,
                policy: PackagingPolicy::new(e.product_id, false, vec![]),
            };
        }
        ProductEvent::PackagingAdded(e) => {
            rm.policy.packagings.retain(|p| p.id != e.packaging_id);
            rm.policy.packagings.push(Packaging {
                id: e.packaging_id,
                name: e.name,
                qty: e.qty,
                can_be_sold: e.can_be_sold,
            });
        }
        ProductEvent::PackagingRemoved(e) => {
            rm.policy.packagings.retain(|p| p.id != e.packaging_id);
        }
        ProductEvent::SellOnlyByPackagingChanged(e) => {
            rm.policy.sell_only_by_packaging = e.enabled;
        }
    }
    rm
}
