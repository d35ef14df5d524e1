//! The inbound checkout request and its validation rules.

use std::collections::HashMap;

use common::UserId;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value_objects::{MAX_QUANTITY, Money, StockLine, VariantKey};

/// How the order is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Delivery,
}

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingMethod::Delivery => "delivery",
        }
    }
}

impl std::str::FromStr for ShippingMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivery" => Ok(ShippingMethod::Delivery),
            other => Err(ValidationError::Unsupported {
                field: "shipping",
                value: other.to_string(),
            }),
        }
    }
}

/// How the order is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            other => Err(ValidationError::Unsupported {
                field: "payment",
                value: other.to_string(),
            }),
        }
    }
}

/// Who receives the shipment. Snapshotted onto the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    /// Preferred delivery window, e.g. `"morning"`.
    pub delivery_time: Option<String>,
}

impl Recipient {
    /// Checks that every required field is present and well formed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("recipient.name", &self.name)?;
        require("recipient.phone", &self.phone)?;
        require("recipient.email", &self.email)?;
        require("recipient.address", &self.address)?;

        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && domain.contains('.') && !domain.contains('@') =>
            {
                Ok(())
            }
            _ => Err(ValidationError::InvalidEmail(email.to_string())),
        }
    }
}

/// One line of the shopper's cart.
///
/// Carries no price: prices come from the catalog at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant: VariantKey,
    /// Display name as shown to the shopper.
    pub name: String,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(variant: VariantKey, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            variant,
            name: name.into(),
            quantity,
        }
    }
}

/// Everything needed to run one checkout.
///
/// Created per call and discarded when the pipeline returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub lines: Vec<CartLine>,
    pub shipping: ShippingMethod,
    pub payment: PaymentMethod,
    pub recipient: Recipient,
    pub freight: Money,
    /// Single-use payment token ("prime") issued to the client by the gateway SDK.
    pub payment_token: String,
    /// Client-chosen nonce distinguishing deliberate re-purchases of the same cart.
    pub nonce: Option<String>,
}

impl CheckoutRequest {
    /// Validates the request shape. Prices and stock are checked later.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.lines.is_empty() {
            return Err(ValidationError::EmptyCart);
        }

        let mut totals: HashMap<&VariantKey, u64> = HashMap::new();
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(ValidationError::InvalidQuantity {
                    variant: line.variant.clone(),
                    quantity: line.quantity,
                });
            }

            let total = totals.entry(&line.variant).or_insert(0);
            *total += u64::from(line.quantity);
            if *total > u64::from(MAX_QUANTITY) {
                return Err(ValidationError::QuantityTooLarge {
                    variant: line.variant.clone(),
                    max: MAX_QUANTITY,
                });
            }
        }

        if self.freight.is_negative() {
            return Err(ValidationError::InvalidFreight(self.freight.cents()));
        }

        require("prime", &self.payment_token)?;
        self.recipient.validate()
    }

    /// Returns the cart as stock lines, merged per variant.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        StockLine::consolidate(
            self.lines
                .iter()
                .map(|line| StockLine::new(line.variant.clone(), line.quantity)),
        )
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}
