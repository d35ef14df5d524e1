//! Read-only access to authoritative product prices.

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{CatalogEntry, VariantKey};

use crate::Result;

/// Resolves variants to their current catalog entry.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Looks up every variant in `variants`. Unknown variants are absent from
    /// the returned map.
    async fn resolve(&self, variants: &[VariantKey]) -> Result<HashMap<VariantKey, CatalogEntry>>;
}
