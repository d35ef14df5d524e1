//! Checkout orchestration.
//!
//! Turns a validated cart into a paid, persisted order: prices are resolved
//! from the catalog, payment is captured once per idempotency key, and the
//! stock decrement commits together with the order row. Any failure after
//! capture refunds the payment.

pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod retry;
pub mod state;

pub use error::{CheckoutError, PaymentError, Result};
pub use gateway::{
    CaptureRequest, Cardholder, HttpGatewayConfig, HttpPaymentGateway, InMemoryPaymentGateway,
    PaymentGateway,
};
pub use orchestrator::{
    CancelReceipt, CheckoutConfig, CheckoutOrchestrator, CheckoutReceipt, CheckoutService,
};
pub use retry::{Backoff, RetryPolicy};
pub use state::CheckoutState;
