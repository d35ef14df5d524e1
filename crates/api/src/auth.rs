//! Caller identity.
//!
//! Authentication happens upstream. The proxy in front of this service sets
//! `x-user-id` (integer) and optionally `x-user-role`; [`principal_middleware`]
//! turns those headers into a [`Principal`] request extension.

use axum::extract::{FromRequestParts, Request};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Option<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user_id = headers
            .get(USER_ID_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<i64>()
            .ok()?;

        let role = headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|role| role.trim().to_ascii_lowercase())
            .filter(|role| !role.is_empty());

        Some(Self {
            user_id: UserId::new(user_id),
            role,
        })
    }
}

/// Attaches a [`Principal`] to requests that carry identity headers.
///
/// Requests without them pass through untouched; routes that need a caller
/// reject them via the [`Principal`] extractor.
pub async fn principal_middleware(mut req: Request, next: Next) -> Response {
    if let Some(principal) = Principal::from_headers(req.headers()) {
        req.extensions_mut().insert(principal);
    }
    next.run(req).await
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}
