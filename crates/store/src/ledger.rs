//! The stock ledger contract.

use async_trait::async_trait;
use domain::{StockLine, VariantKey};

use crate::Result;

/// Outcome of a best-effort availability pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Availability {
    pub available: bool,
    /// Variants that lack stock or do not exist.
    pub unavailable: Vec<VariantKey>,
}

impl Availability {
    pub fn from_unavailable(unavailable: Vec<VariantKey>) -> Self {
        Self {
            available: unavailable.is_empty(),
            unavailable,
        }
    }
}

/// Single source of truth for remaining inventory per variant.
///
/// `reserve_and_decrement` and `restore` are the only code paths that write
/// stock. Implementations must express the decrement as one conditional
/// update evaluated by the storage engine, never as read-check-write.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Transaction handle shared with the order repository.
    type Tx: Send;

    /// Non-blocking pre-check. Reserves nothing and may be stale.
    async fn check_availability(&self, items: &[StockLine]) -> Result<Availability>;

    /// Takes stock for every line inside `tx`.
    ///
    /// Fails with [`StoreError::InsufficientStock`](crate::StoreError::InsufficientStock)
    /// if any line would drive stock below zero; the caller must then roll
    /// back `tx`.
    async fn reserve_and_decrement(&self, items: &[StockLine], tx: &mut Self::Tx) -> Result<()>;

    /// Returns stock for every line inside `tx`.
    async fn restore(&self, items: &[StockLine], tx: &mut Self::Tx) -> Result<()>;

    /// Reads the committed stock of one variant.
    async fn stock(&self, variant: &VariantKey) -> Result<Option<i64>>;
}
