use common::OrderId;
use domain::{OrderStatus, VariantKey};
use thiserror::Error;

/// Errors that can occur when interacting with checkout storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional decrement matched no row: stock ran out.
    #[error("Insufficient stock for {}", format_variants(.variants))]
    InsufficientStock { variants: Vec<VariantKey> },

    /// The variant does not exist in the ledger.
    #[error("Variant not found: {0}")]
    VariantNotFound(VariantKey),

    /// An order with this ID already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order is not in the status the caller expected.
    #[error("Order {order_id} cannot move from {expected} to {to}: currently {actual}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
        to: OrderStatus,
    },

    /// The transaction exceeded its time budget and was rolled back.
    #[error("Storage transaction timed out")]
    Timeout,

    /// The backend refused the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

fn format_variants(variants: &[VariantKey]) -> String {
    variants
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
