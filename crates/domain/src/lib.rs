//! Domain layer for the checkout pipeline.
//!
//! This crate provides the pure, side-effect free pieces of checkout:
//! - value objects for variants and money
//! - `CheckoutRequest` with its validation rules
//! - `PriceQuote`, computed from catalog prices only
//! - deterministic idempotency keys
//! - `Order` with its status machine and `PaymentRecord`

pub mod error;
pub mod idempotency;
pub mod order;
pub mod payment;
pub mod quote;
pub mod request;
pub mod value_objects;

pub use error::ValidationError;
pub use idempotency::IdempotencyKey;
pub use order::{Order, OrderLine, OrderStatus};
pub use payment::{PaymentRecord, PaymentStatus};
pub use quote::{CatalogEntry, PriceQuote, QuotedLine};
pub use request::{CartLine, CheckoutRequest, PaymentMethod, Recipient, ShippingMethod};
pub use value_objects::{MAX_QUANTITY, Money, ProductId, StockLine, VariantKey};
