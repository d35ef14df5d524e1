//! Server-side price quotes.
//!
//! A quote is derived at checkout time from catalog prices and is never
//! stored. Client-side prices do not participate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::request::CartLine;
use crate::value_objects::{Money, StockLine, VariantKey};

/// Authoritative catalog data for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub product_name: String,
    pub color_name: String,
    pub unit_price: Money,
}

impl CatalogEntry {
    pub fn new(
        product_name: impl Into<String>,
        color_name: impl Into<String>,
        unit_price: Money,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            color_name: color_name.into(),
            unit_price,
        }
    }
}

/// A cart line priced from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedLine {
    pub variant: VariantKey,
    pub name: String,
    pub color_name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl QuotedLine {
    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Priced cart: per-line unit prices, subtotal and total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    lines: Vec<QuotedLine>,
    subtotal: Money,
    freight: Money,
    total: Money,
}

impl PriceQuote {
    /// Prices `lines` using `catalog`.
    ///
    /// Every variant in the cart must be present in `catalog`; missing ones
    /// are reported together as `ProductMismatch`.
    pub fn build(
        lines: &[CartLine],
        freight: Money,
        catalog: &HashMap<VariantKey, CatalogEntry>,
    ) -> Result<Self, ValidationError> {
        let missing: Vec<VariantKey> = lines
            .iter()
            .filter(|line| !catalog.contains_key(&line.variant))
            .map(|line| line.variant.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::ProductMismatch { variants: missing });
        }

        let mut quoted = Vec::with_capacity(lines.len());
        let mut subtotal = Money::zero();
        for line in lines {
            let entry = &catalog[&line.variant];
            let priced = QuotedLine {
                variant: line.variant.clone(),
                name: entry.product_name.clone(),
                color_name: entry.color_name.clone(),
                unit_price: entry.unit_price,
                quantity: line.quantity,
            };
            subtotal = priced
                .line_total()
                .and_then(|line_total| subtotal.checked_add(line_total))
                .ok_or(ValidationError::AmountOverflow)?;
            quoted.push(priced);
        }

        let total = subtotal
            .checked_add(freight)
            .ok_or(ValidationError::AmountOverflow)?;

        Ok(Self {
            lines: quoted,
            subtotal,
            freight,
            total,
        })
    }

    pub fn lines(&self) -> &[QuotedLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn freight(&self) -> Money {
        self.freight
    }

    pub fn total(&self) -> Money {
        self.total
    }

    /// Human readable summary sent to the payment gateway.
    pub fn details(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("{} x{}", line.name, line.quantity))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns the quoted lines as stock lines, merged per variant.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        StockLine::consolidate(
            self.lines
                .iter()
                .map(|line| StockLine::new(line.variant.clone(), line.quantity)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> HashMap<VariantKey, CatalogEntry> {
        HashMap::from([
            (
                VariantKey::new("P1", "FFFFFF", "S"),
                CatalogEntry::new("Dress", "White", Money::from_cents(79900)),
            ),
            (
                VariantKey::new("P2", "DDFFBB", "M"),
                CatalogEntry::new("Shirt", "Green", Money::from_cents(29900)),
            ),
        ])
    }

    #[test]
    fn test_totals_use_catalog_prices() {
        let lines = vec![
            CartLine::new(VariantKey::new("P1", "FFFFFF", "S"), "whatever", 2),
            CartLine::new(VariantKey::new("P2", "DDFFBB", "M"), "Shirt", 1),
        ];
        let quote = PriceQuote::build(&lines, Money::from_cents(6000), &catalog()).unwrap();

        assert_eq!(quote.subtotal().cents(), 2 * 79900 + 29900);
        assert_eq!(quote.total().cents(), 2 * 79900 + 29900 + 6000);
        assert_eq!(quote.lines()[0].name, "Dress");
        assert_eq!(quote.lines()[0].color_name, "White");
        assert_eq!(quote.details(), "Dress x2, Shirt x1");
    }

    #[test]
    fn test_unknown_variants_reported_together() {
        let lines = vec![
            CartLine::new(VariantKey::new("P1", "000000", "S"), "Dress", 1),
            CartLine::new(VariantKey::new("P1", "FFFFFF", "S"), "Dress", 1),
            CartLine::new(VariantKey::new("P9", "FFFFFF", "XL"), "Ghost", 1),
        ];
        let err = PriceQuote::build(&lines, Money::zero(), &catalog()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ProductMismatch {
                variants: vec![
                    VariantKey::new("P1", "000000", "S"),
                    VariantKey::new("P9", "FFFFFF", "XL"),
                ]
            }
        );
    }

    #[test]
    fn test_overflow_is_a_validation_error() {
        let key = VariantKey::new("P1", "FFFFFF", "S");
        let catalog = HashMap::from([(
            key.clone(),
            CatalogEntry::new("Gold", "Gold", Money::from_cents(i64::MAX / 2)),
        )]);
        let lines = vec![CartLine::new(key, "Gold", 3)];
        assert_eq!(
            PriceQuote::build(&lines, Money::zero(), &catalog),
            Err(ValidationError::AmountOverflow)
        );
    }
}
