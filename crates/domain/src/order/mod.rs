//! Orders and their line items.

mod status;

pub use status::OrderStatus;

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::quote::{PriceQuote, QuotedLine};
use crate::request::{CheckoutRequest, PaymentMethod, Recipient, ShippingMethod};
use crate::value_objects::{Money, StockLine, VariantKey};

/// A line of a persisted order, with price and attributes snapshotted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant: VariantKey,
    pub name: String,
    pub color_name: String,
    /// Catalog price at the time of checkout.
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderLine {
    /// Returns `unit_price * quantity`.
    pub fn total_price(&self) -> Money {
        Money::from_cents(self.unit_price.cents() * i64::from(self.quantity))
    }
}

impl From<&QuotedLine> for OrderLine {
    fn from(line: &QuotedLine) -> Self {
        Self {
            variant: line.variant.clone(),
            name: line.name.clone(),
            color_name: line.color_name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
        }
    }
}

/// A durably persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub recipient: Recipient,
    pub shipping: ShippingMethod,
    pub payment: PaymentMethod,
    pub subtotal: Money,
    pub freight: Money,
    pub total: Money,
    /// Gateway transaction that paid for this order.
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Builds the `paid` order for a checkout whose payment was captured.
    pub fn paid(
        id: OrderId,
        request: &CheckoutRequest,
        quote: &PriceQuote,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            user_id: request.user_id,
            status: OrderStatus::Paid,
            recipient: request.recipient.clone(),
            shipping: request.shipping,
            payment: request.payment,
            subtotal: quote.subtotal(),
            freight: quote.freight(),
            total: quote.total(),
            transaction_id: transaction_id.into(),
            created_at: Utc::now(),
            lines: quote.lines().iter().map(OrderLine::from).collect(),
        }
    }

    /// Recomputes `Σ(unit_price × quantity) + freight` from the lines.
    pub fn computed_total(&self) -> Money {
        self.lines.iter().map(OrderLine::total_price).sum::<Money>() + self.freight
    }

    /// Returns the order's lines as stock lines, merged per variant.
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
    use std::collections::HashMap;

    use super::*;
    use crate::quote::CatalogEntry;
    use crate::request::CartLine;

    #[test]
    fn test_paid_order_snapshots_quote() {
        let key = VariantKey::new("P1", "FFFFFF", "S");
        let catalog = HashMap::from([(
            key.clone(),
            CatalogEntry::new("Dress", "White", Money::from_cents(1000)),
        )]);
        let request = CheckoutRequest {
            user_id: UserId::new(3),
            lines: vec![CartLine::new(key.clone(), "Dress", 2)],
            shipping: ShippingMethod::Delivery,
            payment: PaymentMethod::CreditCard,
            recipient: Recipient {
                name: "Luke".to_string(),
                phone: "0911".to_string(),
                email: "luke@example.com".to_string(),
                address: "Taipei".to_string(),
                delivery_time: None,
            },
            freight: Money::from_cents(60),
            payment_token: "prime".to_string(),
            nonce: None,
        };
        let quote = PriceQuote::build(&request.lines, request.freight, &catalog).unwrap();

        let order = Order::paid(OrderId::new(), &request, &quote, "TXN-1");

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.total.cents(), 2060);
        assert_eq!(order.computed_total(), order.total);
        assert_eq!(order.lines[0].color_name, "White");
        assert_eq!(order.stock_lines(), vec![StockLine::new(key, 2)]);
    }
}
