//! Durable record of captured payments.

use async_trait::async_trait;
use domain::{IdempotencyKey, PaymentRecord, PaymentStatus};

use crate::Result;

/// Stores one [`PaymentRecord`] per idempotency key.
///
/// Records are upserted as their status changes and never deleted.
/// Ownership of a capture is taken with [`create`](Self::create) or
/// [`transition`](Self::transition); only the winner may settle it.
#[async_trait]
pub trait PaymentRecordStore: Send + Sync {
    async fn save(&self, record: &PaymentRecord) -> Result<()>;

    /// Inserts the record unless one exists for the key. Returns false if
    /// another record was already there.
    async fn create(&self, record: &PaymentRecord) -> Result<bool>;

    /// Moves the record from `from` to `to` if it is currently `from`.
    async fn transition(
        &self,
        key: &IdempotencyKey,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool>;

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>>;
}
