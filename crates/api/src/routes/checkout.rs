//! `POST /order/checkout`.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use common::UserId;
use domain::{CartLine, CheckoutRequest, Money, Recipient, ValidationError, VariantKey};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::Principal;
use crate::error::ApiError;

// -- Request types --

/// Checkout body as sent by the storefront.
#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub order: OrderBody,
    /// Single-use card token from the gateway SDK.
    #[serde(default)]
    pub prime: String,
    #[serde(default)]
    pub nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderBody {
    pub list: Vec<ListItem>,
    pub recipient: RecipientBody,
    pub shipping: String,
    pub payment: String,
    /// Minor units.
    #[serde(default)]
    pub freight: i64,
}

/// One cart entry. Client-sent prices are ignored.
#[derive(Debug, Deserialize)]
pub struct ListItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub color: ColorBody,
    pub size: String,
    pub qty: u32,
}

#[derive(Debug, Deserialize)]
pub struct ColorBody {
    #[serde(default)]
    pub name: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RecipientBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub time: Option<String>,
}

impl CheckoutBody {
    /// Converts the wire body into a domain request for `user_id`.
    pub fn into_request(self, user_id: UserId) -> Result<CheckoutRequest, ValidationError> {
        let OrderBody {
            list,
            recipient,
            shipping,
            payment,
            freight,
        } = self.order;

        let lines = list
            .into_iter()
            .map(|item| {
                CartLine::new(
                    VariantKey::new(item.id, item.color.code, item.size),
                    item.name,
                    item.qty,
                )
            })
            .collect();

        Ok(CheckoutRequest {
            user_id,
            lines,
            shipping: shipping.parse()?,
            payment: payment.parse()?,
            recipient: Recipient {
                name: recipient.name,
                phone: recipient.phone,
                email: recipient.email,
                address: recipient.address,
                delivery_time: recipient.time.filter(|t| !t.is_empty()),
            },
            freight: Money::from_cents(freight),
            payment_token: self.prime,
            nonce: self.nonce.filter(|n| !n.is_empty()),
        })
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub data: OrderNumber,
}

#[derive(Debug, Serialize)]
pub struct OrderNumber {
    pub number: String,
}

// -- Handlers --

/// POST /order/checkout
///
/// Runs one checkout for the calling principal.
#[tracing::instrument(
    skip(state, principal, payload),
    fields(user_id = principal.user_id.as_i64())
)]
pub async fn checkout(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let Json(body) = payload.map_err(|err| ApiError::rejected(err, state.legacy_responses))?;
    let request = body
        .into_request(principal.user_id)
        .map_err(|err| ApiError::checkout(err.into(), state.legacy_responses))?;

    let receipt = state
        .checkout
        .checkout(request)
        .await
        .map_err(|err| ApiError::checkout(err, state.legacy_responses))?;

    tracing::info!(
        order_id = %receipt.order_id,
        total = receipt.total.cents(),
        replayed = receipt.replayed,
        "checkout completed"
    );

    Ok(Json(CheckoutResponse {
        data: OrderNumber {
            number: receipt.order_id.to_string(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use domain::{PaymentMethod, ShippingMethod};

    use super::*;

    fn body(shipping: &str) -> CheckoutBody {
        serde_json::from_value(serde_json::json!({
            "order": {
                "shipping": shipping,
                "payment": "credit_card",
                "subtotal": 1,
                "freight": 60,
                "total": 61,
                "recipient": {
                    "name": "Luke",
                    "phone": "0987654321",
                    "email": "luke@example.com",
                    "address": "Taipei",
                    "time": "morning"
                },
                "list": [{
                    "id": "201807201824",
                    "name": "Dress",
                    "price": 1,
                    "color": { "name": "White", "code": "FFFFFF" },
                    "size": "S",
                    "qty": 2
                }]
            },
            "prime": "prime-token"
        }))
        .unwrap()
    }

    #[test]
    fn test_into_request() {
        let request = body("delivery").into_request(UserId::new(9)).unwrap();

        assert_eq!(request.user_id, UserId::new(9));
        assert_eq!(request.shipping, ShippingMethod::Delivery);
        assert_eq!(request.payment, PaymentMethod::CreditCard);
        assert_eq!(request.freight, Money::from_cents(60));
        assert_eq!(request.payment_token, "prime-token");
        assert_eq!(request.nonce, None);
        assert_eq!(
            request.lines,
            vec![CartLine::new(
                VariantKey::new("201807201824", "FFFFFF", "S"),
                "Dress",
                2
            )]
        );
        assert_eq!(request.recipient.delivery_time.as_deref(), Some("morning"));
    }

    #[test]
    fn test_unsupported_shipping() {
        let err = body("pickup").into_request(UserId::new(9)).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Unsupported {
                field: "shipping",
                ..
            }
        ));
    }
}
