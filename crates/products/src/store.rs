use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shipstock_core::{AggregateId, TenantId};

/// Product identifier (tenant-scoped via `tenant_id` arguments on the store).
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

/// The slice of a catalog product this system reads and mutates.
///
/// `buying_price` is held in whole currency units; the receipt processor
/// writes the integer-rounded landed cost here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: ProductId,
    pub name: String,
    pub short_name: Option<String>,
    pub sku: Option<String>,
    pub quantity: i64,
    pub buying_price: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProductStoreError {
    #[error("product not found: {0}")]
    NotFound(String),

    #[error("product store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup + mutation contract with the external product catalog.
///
/// Resolution order for textual lookup is fixed: exact name, then short name,
/// then SKU. Mutations are per-product writes with no cross-product atomicity;
/// callers that touch several products must handle partial failure themselves.
pub trait ProductStore: Send + Sync {
    fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductRecord>;

    /// Resolve by the name → short-name → SKU fallback chain.
    fn find_by_text(&self, tenant_id: TenantId, needle: &str) -> Option<ProductRecord>;

    fn upsert(&self, tenant_id: TenantId, record: ProductRecord);

    fn list(&self, tenant_id: TenantId) -> Vec<ProductRecord>;

    /// `quantity += delta` (delta may be negative on receipt undo).
    fn adjust_quantity(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        delta: i64,
    ) -> Result<(), ProductStoreError>;

    /// Overwrite the stored buying price.
    fn set_buying_price(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        buying_price: i64,
    ) -> Result<(), ProductStoreError>;
}

impl<S> ProductStore for std::sync::Arc<S>
where
    S: ProductStore + ?Sized,
{
    fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductRecord> {
        (**self).get(tenant_id, product_id)
    }

    fn find_by_text(&self, tenant_id: TenantId, needle: &str) -> Option<ProductRecord> {
        (**self).find_by_text(tenant_id, needle)
    }

    fn upsert(&self, tenant_id: TenantId, record: ProductRecord) {
        (**self).upsert(tenant_id, record)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<ProductRecord> {
        (**self).list(tenant_id)
    }

    fn adjust_quantity(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        delta: i64,
    ) -> Result<(), ProductStoreError> {
        (**self).adjust_quantity(tenant_id, product_id, delta)
    }

    fn set_buying_price(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        buying_price: i64,
    ) -> Result<(), ProductStoreError> {
        (**self).set_buying_price(tenant_id, product_id, buying_price)
    }
}

/// In-memory tenant-isolated product store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    inner: RwLock<HashMap<(TenantId, ProductId), ProductRecord>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProductStore for InMemoryProductStore {
    fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductRecord> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, *product_id)).cloned()
    }

    fn find_by_text(&self, tenant_id: TenantId, needle: &str) -> Option<ProductRecord> {
        let map = self.inner.read().ok()?;
        let tenant_records = || {
            map.iter()
                .filter(move |((t, _), _)| *t == tenant_id)
                .map(|(_, v)| v)
        };

        tenant_records()
            .find(|r| r.name == needle)
            .or_else(|| tenant_records().find(|r| r.short_name.as_deref() == Some(needle)))
            .or_else(|| tenant_records().find(|r| r.sku.as_deref() == Some(needle)))
            .cloned()
    }

    fn upsert(&self, tenant_id: TenantId, record: ProductRecord) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, record.product_id), record);
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<ProductRecord> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((t, _), v)| if *t == tenant_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn adjust_quantity(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        delta: i64,
    ) -> Result<(), ProductStoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| ProductStoreError::Unavailable("lock poisoned".to_string()))?;

        let record = map
            .get_mut(&(tenant_id, *product_id))
            .ok_or_else(|| ProductStoreError::NotFound(product_id.to_string()))?;
        record.quantity += delta;
        Ok(())
    }

    fn set_buying_price(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
        buying_price: i64,
    ) -> Result<(), ProductStoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| ProductStoreError::Unavailable("lock poisoned".to_string()))?;

        let record = map
            .get_mut(&(tenant_id, *product_id))
            .ok_or_else(|| ProductStoreError::NotFound(product_id.to_string()))?;
        record.buying_price = buying_price;
        Ok(())
    }
}
