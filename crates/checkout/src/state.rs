//! Checkout state machine.

use serde::{Deserialize, Serialize};

/// The stage a checkout has reached.
///
/// State transitions:
/// ```text
/// Validating ──► StockChecked ──► PaymentCaptured ──► OrderPersisted ──► Completed
///     │               │                  │
///     └──► Rejected ◄─┘                  └──► Compensating ──► Failed
/// ```
///
/// `Validating` moves straight to `Completed` when the attempt was persisted
/// already, and straight to `PaymentCaptured` when an earlier capture of the
/// attempt is resumed. `PaymentCaptured` may also complete on an order a
/// concurrent copy persisted, or fail without compensating when that copy
/// owns the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckoutState {
    /// Request shape and catalog prices are being checked.
    #[default]
    Validating,

    /// Advisory stock pre-check passed.
    StockChecked,

    /// The gateway captured the funds.
    PaymentCaptured,

    /// Order row and stock decrement committed.
    OrderPersisted,

    /// Receipt returned (terminal state).
    Completed,

    /// Stopped before any money moved (terminal state).
    Rejected,

    /// A captured payment is being refunded.
    Compensating,

    /// Stopped after compensation (terminal state).
    Failed,
}

impl CheckoutState {
    /// Returns true if moving to `next` is a legal step.
    pub fn can_transition_to(&self, next: CheckoutState) -> bool {
        use CheckoutState::*;
        matches!(
            (self, next),
            (Validating, StockChecked)
                | (Validating, PaymentCaptured)
                | (Validating, Completed)
                | (Validating, Rejected)
                | (StockChecked, PaymentCaptured)
                | (StockChecked, Rejected)
                | (PaymentCaptured, OrderPersisted)
                | (PaymentCaptured, Completed)
                | (PaymentCaptured, Compensating)
                | (PaymentCaptured, Failed)
                | (OrderPersisted, Completed)
                | (Compensating, Failed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutState::Completed | CheckoutState::Rejected | CheckoutState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Validating => "Validating",
            CheckoutState::StockChecked => "StockChecked",
            CheckoutState::PaymentCaptured => "PaymentCaptured",
            CheckoutState::OrderPersisted => "OrderPersisted",
            CheckoutState::Completed => "Completed",
            CheckoutState::Rejected => "Rejected",
            CheckoutState::Compensating => "Compensating",
            CheckoutState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
