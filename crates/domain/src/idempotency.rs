//! Deterministic idempotency keys for checkout attempts.

use common::OrderId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::CheckoutRequest;

/// Number of digest bytes kept. 16 bytes render as 32 hex characters,
/// which fits the gateway's `order_number` field.
const KEY_BYTES: usize = 16;

/// Identifies one logical checkout attempt.
///
/// Derived from the shopper, the consolidated cart content and the client
/// nonce (falling back to the single-use payment token). Retrying the same
/// logical checkout yields the same key, so the gateway and the payment
/// record store can deduplicate captures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the key for `request`.
    pub fn derive(request: &CheckoutRequest) -> Self {
        Self::from_digest(&Self::digest(request))
    }

    /// Wraps a key previously produced by [`IdempotencyKey::derive`].
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The order ID reserved for this attempt.
    ///
    /// Two attempts with the same key share one order ID, so the order
    /// table's primary key admits at most one order per attempt.
    pub fn order_id(&self) -> OrderId {
        let mut bytes = [0u8; KEY_BYTES];
        if let Ok(decoded) = hex::decode(&self.0) {
            let n = decoded.len().min(KEY_BYTES);
            bytes[..n].copy_from_slice(&decoded[..n]);
        }
        OrderId::from_bytes(bytes)
    }

    /// Recovers the key of the attempt that reserved `order_id`.
    pub fn from_order_id(order_id: OrderId) -> Self {
        Self(hex::encode(order_id.as_uuid().as_bytes()))
    }

    fn digest(request: &CheckoutRequest) -> [u8; KEY_BYTES] {
        let mut hasher = Sha256::new();
        hasher.update(request.user_id.as_i64().to_be_bytes());
        hasher.update([0x1e]);
        for line in request.stock_lines() {
            hasher.update(line.variant.product_id.as_str().as_bytes());
            hasher.update([0x1f]);
            hasher.update(line.variant.color_code.as_bytes());
            hasher.update([0x1f]);
            hasher.update(line.variant.size.as_bytes());
            hasher.update([0x1f]);
            hasher.update(line.quantity.to_be_bytes());
            hasher.update([0x1e]);
        }
        let nonce = request
            .nonce
            .as_deref()
            .unwrap_or(request.payment_token.as_str());
        hasher.update(nonce.as_bytes());

        let digest = hasher.finalize();
        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(&digest[..KEY_BYTES]);
        bytes
    }

    fn from_digest(bytes: &[u8; KEY_BYTES]) -> Self {
        Self(hex::encode(bytes))
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
