//! Integration tests for the checkout domain.
//!
//! These tests walk a request through validation, pricing, order
//! construction and payment bookkeeping without any storage.

use std::collections::HashMap;

use common::UserId;
use domain::{
    CartLine, CatalogEntry, CheckoutRequest, IdempotencyKey, Money, Order, OrderStatus,
    PaymentMethod, PaymentRecord, PaymentStatus, PriceQuote, Recipient, ShippingMethod,
    StockLine, ValidationError, VariantKey,
};

fn dress(size: &str) -> VariantKey {
    VariantKey::new("201807201824", "FFFFFF", size)
}

fn catalog() -> HashMap<VariantKey, CatalogEntry> {
    HashMap::from([
        (
            dress("S"),
            CatalogEntry::new("Dress", "White", Money::from_cents(799)),
        ),
        (
            dress("M"),
            CatalogEntry::new("Dress", "White", Money::from_cents(899)),
        ),
    ])
}

fn request(lines: Vec<CartLine>) -> CheckoutRequest {
    CheckoutRequest {
        user_id: UserId::new(7),
        lines,
        shipping: ShippingMethod::Delivery,
        payment: PaymentMethod::CreditCard,
        recipient: Recipient {
            name: "Luke".to_string(),
            phone: "0987654321".to_string(),
            email: "luke@example.com".to_string(),
            address: "Taipei".to_string(),
            delivery_time: None,
        },
        freight: Money::from_cents(60),
        payment_token: "prime-1".to_string(),
        nonce: None,
    }
}

mod pricing {
    use super::*;

    #[test]
    fn order_total_matches_catalog_prices() {
        let request = request(vec![
            CartLine::new(dress("S"), "Dress", 2),
            CartLine::new(dress("M"), "Dress", 1),
        ]);
        request.validate().unwrap();

        let quote = PriceQuote::build(&request.lines, request.freight, &catalog()).unwrap();
        let key = IdempotencyKey::derive(&request);
        let order = Order::paid(key.order_id(), &request, &quote, "TXN-000001");

        assert_eq!(quote.subtotal(), Money::from_cents(2 * 799 + 899));
        assert_eq!(order.total, Money::from_cents(2 * 799 + 899 + 60));
        assert_eq!(order.computed_total(), order.total);
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[test]
    fn unknown_variants_are_reported_together() {
        let request = request(vec![
            CartLine::new(dress("S"), "Dress", 1),
            CartLine::new(dress("XL"), "Dress", 1),
            CartLine::new(VariantKey::new("999", "000000", "S"), "Ghost", 1),
        ]);

        let err = PriceQuote::build(&request.lines, request.freight, &catalog()).unwrap_err();

        match err {
            ValidationError::ProductMismatch { variants } => assert_eq!(variants.len(), 2),
            other => panic!("expected ProductMismatch, got {other:?}"),
        }
    }

    #[test]
    fn repeated_lines_consolidate_for_stock() {
        let request = request(vec![
            CartLine::new(dress("S"), "Dress", 1),
            CartLine::new(dress("S"), "Dress", 2),
        ]);

        assert_eq!(request.stock_lines(), vec![StockLine::new(dress("S"), 3)]);
    }
}

mod idempotency {
    use super::*;

    #[test]
    fn same_attempt_same_key_and_order() {
        let first = request(vec![CartLine::new(dress("S"), "Dress", 1)]);
        let second = first.clone();

        let key = IdempotencyKey::derive(&first);
        assert_eq!(key, IdempotencyKey::derive(&second));
        assert_eq!(IdempotencyKey::from_order_id(key.order_id()), key);
    }

    #[test]
    fn nonce_distinguishes_repurchase() {
        let first = request(vec![CartLine::new(dress("S"), "Dress", 1)]);
        let mut again = first.clone();
        again.nonce = Some("second-purchase".to_string());

        assert_ne!(
            IdempotencyKey::derive(&first),
            IdempotencyKey::derive(&again)
        );
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn payment_record_points_at_reserved_order() {
        let request = request(vec![CartLine::new(dress("S"), "Dress", 1)]);
        let key = IdempotencyKey::derive(&request);

        let mut record = PaymentRecord::captured("TXN-000001", key.clone(), Money::from_cents(859));
        assert_eq!(record.order_id, key.order_id());
        assert!(record.is_captured());

        record.mark_refunded();
        assert_eq!(record.status, PaymentStatus::Refunded);
        assert!(!record.is_captured());
    }

    #[test]
    fn only_paid_orders_can_be_cancelled() {
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Cancelled.is_terminal());
    }
}
