//! API error types with HTTP response mapping.
//!
//! Two body shapes exist. The structured shape is
//! `{"error":{"code","message","retryable",...}}`. Legacy mode keeps the
//! plain JSON strings older clients match on (`"out of stock"`,
//! `"product not match"`, a decline message with status 200).

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use domain::ValidationError;
use serde_json::{Value, json};

const CONTACT_SUPPORT_UNRESOLVED: &str =
    "We could not confirm your payment. Please contact support before trying again.";
const CONTACT_SUPPORT_CHARGED: &str =
    "Your payment was charged but the order could not be completed. Please contact support.";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// No principal on the request.
    Unauthenticated,
    /// The principal may not perform this operation.
    Forbidden,
    /// Malformed body or path, rendered per response mode.
    BadRequest { message: String, legacy: bool },
    /// Checkout or cancellation failure, rendered per response mode.
    Checkout { error: CheckoutError, legacy: bool },
}

impl ApiError {
    pub fn checkout(error: CheckoutError, legacy: bool) -> Self {
        ApiError::Checkout { error, legacy }
    }

    pub fn bad_request(message: impl Into<String>, legacy: bool) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            legacy,
        }
    }

    /// Maps a body the JSON extractor could not read.
    pub fn rejected(rejection: JsonRejection, legacy: bool) -> Self {
        Self::bad_request(rejection.body_text(), legacy)
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Forbidden => "forbidden",
            ApiError::BadRequest { .. } => "validation",
            ApiError::Checkout { error, .. } => error.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::counter!("http_error_responses_total", "code" => self.code()).increment(1);

        match self {
            ApiError::Unauthenticated => error_body(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication required",
                false,
            ),
            ApiError::Forbidden => error_body(
                StatusCode::FORBIDDEN,
                "forbidden",
                "Operator role required",
                false,
            ),
            ApiError::BadRequest {
                message,
                legacy: true,
            } => (StatusCode::BAD_REQUEST, Json(message)).into_response(),
            ApiError::BadRequest {
                message,
                legacy: false,
            } => error_body(StatusCode::BAD_REQUEST, "validation", &message, false),
            ApiError::Checkout {
                error,
                legacy: true,
            } => legacy_response(&error),
            ApiError::Checkout {
                error,
                legacy: false,
            } => structured_response(&error),
        }
    }
}

fn error_body(status: StatusCode, code: &str, message: &str, retryable: bool) -> Response {
    let body = json!({
        "error": { "code": code, "message": message, "retryable": retryable }
    });
    (status, Json(body)).into_response()
}

fn structured_response(err: &CheckoutError) -> Response {
    let status = match err {
        CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
        CheckoutError::InsufficientStock { .. } => StatusCode::CONFLICT,
        CheckoutError::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
        CheckoutError::StockRaceLost { .. } => StatusCode::CONFLICT,
        CheckoutError::DuplicateCheckout { .. } => StatusCode::CONFLICT,
        CheckoutError::PaymentUnresolved { .. } => StatusCode::BAD_GATEWAY,
        CheckoutError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CheckoutError::CompensationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CheckoutError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::InvalidTransition { .. } => StatusCode::CONFLICT,
    };

    let mut detail = json!({
        "code": err.code(),
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    });

    match err {
        CheckoutError::InsufficientStock { variants }
        | CheckoutError::StockRaceLost { variants }
        | CheckoutError::Validation(ValidationError::ProductMismatch { variants }) => {
            detail["variants"] = json!(variants);
        }
        CheckoutError::PaymentUnresolved { .. } => {
            detail["message"] = Value::from(CONTACT_SUPPORT_UNRESOLVED);
            detail["contact_support"] = Value::Bool(true);
        }
        CheckoutError::CompensationFailed { transaction_id, .. } => {
            detail["message"] = Value::from(CONTACT_SUPPORT_CHARGED);
            detail["contact_support"] = Value::Bool(true);
            detail["transaction_id"] = Value::from(transaction_id.as_str());
        }
        CheckoutError::Persistence { .. } => {
            // Storage detail stays in the logs.
            detail["message"] = Value::from("The order could not be saved. Please try again.");
            detail["contact_support"] = Value::Bool(true);
        }
        _ => {}
    }

    (status, Json(json!({ "error": detail }))).into_response()
}

fn legacy_response(err: &CheckoutError) -> Response {
    let (status, message) = match err {
        CheckoutError::InsufficientStock { .. } | CheckoutError::StockRaceLost { .. } => {
            (StatusCode::BAD_REQUEST, "out of stock".to_string())
        }
        CheckoutError::Validation(ValidationError::ProductMismatch { .. }) => {
            (StatusCode::BAD_REQUEST, "product not match".to_string())
        }
        CheckoutError::Validation(inner) => (StatusCode::BAD_REQUEST, inner.to_string()),
        CheckoutError::PaymentDeclined { message } => (StatusCode::OK, message.clone()),
        CheckoutError::PaymentUnresolved { .. } => {
            (StatusCode::BAD_GATEWAY, CONTACT_SUPPORT_UNRESOLVED.to_string())
        }
        CheckoutError::CompensationFailed { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            CONTACT_SUPPORT_CHARGED.to_string(),
        ),
        CheckoutError::DuplicateCheckout { .. } | CheckoutError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        CheckoutError::OrderNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        CheckoutError::Persistence { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        ),
    };

    (status, Json(message)).into_response()
}
