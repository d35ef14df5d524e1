//! Payment gateway contract and implementations.

mod http;
mod memory;

pub use http::{HttpGatewayConfig, HttpPaymentGateway};
pub use memory::InMemoryPaymentGateway;

use std::sync::Arc;

use async_trait::async_trait;
use domain::{IdempotencyKey, Money, PaymentRecord, Recipient};
use serde::Serialize;

use crate::error::PaymentError;

/// Cardholder details forwarded to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cardholder {
    pub phone_number: String,
    pub name: String,
    pub email: String,
    pub address: String,
}

impl From<&Recipient> for Cardholder {
    fn from(recipient: &Recipient) -> Self {
        Self {
            phone_number: recipient.phone.clone(),
            name: recipient.name.clone(),
            email: recipient.email.clone(),
            address: recipient.address.clone(),
        }
    }
}

/// One capture call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Single-use token issued to the client.
    pub token: String,
    pub amount: Money,
    /// Sent as the gateway's order number; the gateway deduplicates on it.
    pub idempotency_key: IdempotencyKey,
    /// Human-readable summary of what is being bought.
    pub details: String,
    pub cardholder: Cardholder,
}

/// External payment processor.
///
/// `capture` must be at-most-once per idempotency key: a repeated key
/// returns the original capture instead of charging again.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Captures funds for one checkout attempt.
    async fn capture(&self, request: &CaptureRequest) -> Result<PaymentRecord, PaymentError>;

    /// Refunds `amount` of a captured transaction.
    async fn refund(&self, transaction_id: &str, amount: Money) -> Result<(), PaymentError>;

    /// Looks up the capture made under `key`, if any.
    async fn query(&self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>, PaymentError>;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for Arc<G> {
    async fn capture(&self, request: &CaptureRequest) -> Result<PaymentRecord, PaymentError> {
        (**self).capture(request).await
    }

    async fn refund(&self, transaction_id: &str, amount: Money) -> Result<(), PaymentError> {
        (**self).refund(transaction_id, amount).await
    }

    async fn query(&self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>, PaymentError> {
        (**self).query(key).await
    }
}
