//! Checkout error types.

use common::OrderId;
use domain::{IdempotencyKey, Money, OrderStatus, ValidationError, VariantKey};
use store::StoreError;
use thiserror::Error;
use tracing::Level;

/// Errors returned by a payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The gateway refused the charge. Terminal.
    #[error("Payment declined: {message}")]
    Declined { message: String },

    /// No answer within the request timeout. The charge may or may not exist.
    #[error("Payment gateway timed out")]
    Timeout,

    /// The gateway could not be reached or failed server-side.
    #[error("Payment gateway unavailable: {reason}")]
    Unavailable { reason: String },

    /// The gateway answered with something we could not interpret.
    #[error("Malformed gateway response: {0}")]
    Protocol(String),
}

impl PaymentError {
    /// Returns true if the same request may be sent again.
    pub fn is_transient(&self) -> bool {
        !matches!(self, PaymentError::Declined { .. })
    }
}

/// Outcome taxonomy of a checkout or cancellation.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request is malformed or names unknown variants.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The pre-check found too little stock. No payment was attempted.
    #[error("Insufficient stock for {}", join(.variants))]
    InsufficientStock { variants: Vec<VariantKey> },

    /// The gateway declined the payment.
    #[error("Payment declined: {message}")]
    PaymentDeclined { message: String },

    /// Retries ran out without a definite capture result.
    #[error("Payment outcome unresolved for {idempotency_key}: {reason}")]
    PaymentUnresolved {
        idempotency_key: IdempotencyKey,
        reason: String,
    },

    /// Another checkout took the last units after payment; refunded.
    #[error("Stock ran out during checkout for {}", join(.variants))]
    StockRaceLost { variants: Vec<VariantKey> },

    /// Storage failed. Any captured payment was refunded.
    #[error("Persistence error: {reason}")]
    Persistence { reason: String },

    /// A refund failed: funds are captured with no order behind them.
    #[error("Refund of {amount} for transaction {transaction_id} failed: {reason}")]
    CompensationFailed {
        transaction_id: String,
        amount: Money,
        reason: String,
    },

    /// This attempt already settled, or is being processed concurrently.
    #[error("Checkout {idempotency_key} was already processed")]
    DuplicateCheckout { idempotency_key: IdempotencyKey },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl CheckoutError {
    /// Stable machine-readable code, used in metrics labels and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::Validation(ValidationError::ProductMismatch { .. }) => {
                "product_mismatch"
            }
            CheckoutError::Validation(_) => "validation",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::PaymentDeclined { .. } => "payment_declined",
            CheckoutError::PaymentUnresolved { .. } => "payment_unresolved",
            CheckoutError::StockRaceLost { .. } => "stock_race_lost",
            CheckoutError::Persistence { .. } => "persistence",
            CheckoutError::CompensationFailed { .. } => "compensation_failed",
            CheckoutError::DuplicateCheckout { .. } => "duplicate_checkout",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Returns true if the shopper may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::StockRaceLost { .. } | CheckoutError::Persistence { .. }
        )
    }

    /// Log level the outcome deserves. `ERROR` means an operator must act.
    pub fn severity(&self) -> Level {
        match self {
            CheckoutError::PaymentUnresolved { .. } | CheckoutError::CompensationFailed { .. } => {
                Level::ERROR
            }
            CheckoutError::StockRaceLost { .. }
            | CheckoutError::Persistence { .. }
            | CheckoutError::DuplicateCheckout { .. } => Level::WARN,
            _ => Level::INFO,
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock { variants } => CheckoutError::StockRaceLost { variants },
            StoreError::OrderNotFound(order_id) => CheckoutError::OrderNotFound(order_id),
            StoreError::StatusConflict {
                order_id,
                actual,
                to,
                ..
            } => CheckoutError::InvalidTransition {
                order_id,
                from: actual,
                to,
            },
            other => CheckoutError::Persistence {
                reason: other.to_string(),
            },
        }
    }
}

fn join(variants: &[VariantKey]) -> String {
    variants
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
