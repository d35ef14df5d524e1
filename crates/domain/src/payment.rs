//! Payment records.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::idempotency::IdempotencyKey;
use crate::value_objects::Money;

/// Lifecycle of captured funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// The gateway accepted the capture.
    Captured,
    /// A call that found the capture without an order is persisting it.
    Resuming,
    /// A refund is in flight. Only the call that set this may refund.
    Refunding,
    /// The capture was refunded in full.
    Refunded,
    /// A refund was attempted and failed; funds are held with no order.
    RefundFailed,
}

impl PaymentStatus {
    /// Returns true while the funds may still back an order.
    pub fn backs_order(&self) -> bool {
        matches!(self, PaymentStatus::Captured | PaymentStatus::Resuming)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Captured => "captured",
            PaymentStatus::Resuming => "resuming",
            PaymentStatus::Refunding => "refunding",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::RefundFailed => "refund_failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "captured" => Ok(PaymentStatus::Captured),
            "resuming" => Ok(PaymentStatus::Resuming),
            "refunding" => Ok(PaymentStatus::Refunding),
            "refunded" => Ok(PaymentStatus::Refunded),
            "refund_failed" => Ok(PaymentStatus::RefundFailed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Funds captured by the gateway for exactly one checkout attempt.
///
/// Records are never deleted: a refund updates the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Gateway transaction id.
    pub transaction_id: String,
    pub idempotency_key: IdempotencyKey,
    pub order_id: OrderId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub captured_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates a record for a fresh capture.
    pub fn captured(
        transaction_id: impl Into<String>,
        idempotency_key: IdempotencyKey,
        amount: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: transaction_id.into(),
            order_id: idempotency_key.order_id(),
            idempotency_key,
            amount,
            status: PaymentStatus::Captured,
            captured_at: now,
            updated_at: now,
        }
    }

    pub fn is_captured(&self) -> bool {
        self.status == PaymentStatus::Captured
    }

    pub fn mark_refunded(&mut self) {
        self.status = PaymentStatus::Refunded;
        self.updated_at = Utc::now();
    }

    pub fn mark_refund_failed(&mut self) {
        self.status = PaymentStatus::RefundFailed;
        self.updated_at = Utc::now();
    }
}
