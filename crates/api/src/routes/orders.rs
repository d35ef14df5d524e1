//! Operator endpoints on persisted orders.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::Principal;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub data: CancelledOrder,
}

#[derive(Debug, Serialize)]
pub struct CancelledOrder {
    pub number: String,
    pub status: &'static str,
    /// Refunded amount in minor units.
    pub refunded: i64,
}

/// POST /order/{id}/cancel
///
/// Operator-only. Cancels a paid order and refunds it.
#[tracing::instrument(
    skip(state, principal, payload),
    fields(operator = principal.user_id.as_i64())
)]
pub async fn cancel(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    payload: Result<Json<CancelBody>, JsonRejection>,
) -> Result<Json<CancelResponse>, ApiError> {
    if !principal.is_admin() {
        return Err(ApiError::Forbidden);
    }

    let order_id: OrderId = id
        .parse()
        .map_err(|e| {
            ApiError::bad_request(format!("Invalid order id: {e}"), state.legacy_responses)
        })?;

    let Json(body) = payload.map_err(|err| ApiError::rejected(err, state.legacy_responses))?;
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::bad_request(
            "reason is required",
            state.legacy_responses,
        ));
    }

    let receipt = state
        .checkout
        .cancel_order(order_id, reason)
        .await
        .map_err(|err| ApiError::checkout(err, state.legacy_responses))?;

    tracing::info!(%order_id, reason, "order cancelled by operator");

    Ok(Json(CancelResponse {
        data: CancelledOrder {
            number: receipt.order_id.to_string(),
            status: receipt.status.as_str(),
            refunded: receipt.refunded.cents(),
        },
    }))
}
