//! Validation errors raised before any side effect takes place.

use thiserror::Error;

use crate::value_objects::VariantKey;

/// Reasons a checkout request is rejected during validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// A line asked for zero units.
    #[error("Invalid quantity for {variant}: {quantity} (must be at least 1)")]
    InvalidQuantity { variant: VariantKey, quantity: u32 },

    /// The lines for one variant add up to more than an order may hold.
    #[error("Quantity for {variant} exceeds {max}")]
    QuantityTooLarge { variant: VariantKey, max: u32 },

    /// A required field was missing or blank.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The recipient email is not an address.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// Freight must not be negative.
    #[error("Invalid freight: {0} (must not be negative)")]
    InvalidFreight(i64),

    /// An enumerated field carried a value we do not support.
    #[error("Unsupported {field}: {value}")]
    Unsupported { field: &'static str, value: String },

    /// One or more variants do not exist in the catalog.
    #[error("Product not match: {}", format_variants(.variants))]
    ProductMismatch { variants: Vec<VariantKey> },

    /// Price arithmetic overflowed.
    #[error("Order amount out of range")]
    AmountOverflow,
}

fn format_variants(variants: &[VariantKey]) -> String {
    variants
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
