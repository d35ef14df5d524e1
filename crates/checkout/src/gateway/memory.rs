//! In-memory payment gateway for tests and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{IdempotencyKey, Money, PaymentRecord, PaymentStatus};
use tokio::sync::Mutex;

use super::{CaptureRequest, PaymentGateway};
use crate::error::PaymentError;

#[derive(Debug)]
enum ScriptedFailure {
    /// Fail without charging.
    BeforeCapture(PaymentError),
    /// Charge, then report the failure anyway.
    AfterCapture(PaymentError),
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    captures: HashMap<IdempotencyKey, PaymentRecord>,
    transactions: HashMap<String, IdempotencyKey>,
    refunds: Vec<(String, Money)>,
    script: VecDeque<ScriptedFailure>,
    decline: Option<String>,
    fail_on_refund: bool,
    fail_on_query: bool,
    capture_calls: u32,
    query_calls: u32,
    next_id: u32,
}

impl InMemoryGatewayState {
    fn charge(&mut self, request: &CaptureRequest) -> PaymentRecord {
        if let Some(existing) = self.captures.get(&request.idempotency_key) {
            return existing.clone();
        }

        self.next_id += 1;
        let transaction_id = format!("TXN-{:06}", self.next_id);
        let record = PaymentRecord::captured(
            transaction_id.clone(),
            request.idempotency_key.clone(),
            request.amount,
        );
        self.transactions
            .insert(transaction_id, request.idempotency_key.clone());
        self.captures
            .insert(request.idempotency_key.clone(), record.clone());
        record
    }
}

/// Gateway double that deduplicates captures by idempotency key.
///
/// Failures can be scripted per call, so retry and compensation paths can be
/// driven deterministically.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next capture call fail with `error` without charging.
    pub async fn push_failure(&self, error: PaymentError) {
        self.state
            .lock()
            .await
            .script
            .push_back(ScriptedFailure::BeforeCapture(error));
    }

    /// Makes the next capture call charge and then fail with `error`.
    pub async fn push_failure_after_capture(&self, error: PaymentError) {
        self.state
            .lock()
            .await
            .script
            .push_back(ScriptedFailure::AfterCapture(error));
    }

    /// Declines every new capture with `message`, or stops declining.
    pub async fn set_decline(&self, message: Option<&str>) {
        self.state.lock().await.decline = message.map(String::from);
    }

    /// Configures refunds to fail.
    pub async fn set_fail_on_refund(&self, fail: bool) {
        self.state.lock().await.fail_on_refund = fail;
    }

    /// Configures status queries to fail.
    pub async fn set_fail_on_query(&self, fail: bool) {
        self.state.lock().await.fail_on_query = fail;
    }

    /// Number of capture calls received, including failed ones.
    pub async fn capture_calls(&self) -> u32 {
        self.state.lock().await.capture_calls
    }

    /// Number of query calls received.
    pub async fn query_calls(&self) -> u32 {
        self.state.lock().await.query_calls
    }

    /// Number of distinct charges made.
    pub async fn capture_count(&self) -> usize {
        self.state.lock().await.captures.len()
    }

    /// Successful refunds as `(transaction_id, amount)`.
    pub async fn refunds(&self) -> Vec<(String, Money)> {
        self.state.lock().await.refunds.clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn capture(&self, request: &CaptureRequest) -> Result<PaymentRecord, PaymentError> {
        let mut state = self.state.lock().await;
        state.capture_calls += 1;

        match state.script.pop_front() {
            Some(ScriptedFailure::BeforeCapture(error)) => return Err(error),
            Some(ScriptedFailure::AfterCapture(error)) => {
                state.charge(request);
                return Err(error);
            }
            None => {}
        }

        if let Some(existing) = state.captures.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        if let Some(message) = &state.decline {
            return Err(PaymentError::Declined {
                message: message.clone(),
            });
        }

        Ok(state.charge(request))
    }

    async fn refund(&self, transaction_id: &str, amount: Money) -> Result<(), PaymentError> {
        let mut state = self.state.lock().await;

        if state.fail_on_refund {
            return Err(PaymentError::Unavailable {
                reason: "refund service unavailable".to_string(),
            });
        }

        let key = state
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| PaymentError::Declined {
                message: format!("unknown transaction {transaction_id}"),
            })?;
        let record = state
            .captures
            .get_mut(&key)
            .ok_or_else(|| PaymentError::Protocol(format!("no capture behind {transaction_id}")))?;

        if record.status != PaymentStatus::Captured {
            return Err(PaymentError::Declined {
                message: format!("transaction {transaction_id} already refunded"),
            });
        }
        if amount > record.amount {
            return Err(PaymentError::Declined {
                message: format!("refund {amount} exceeds captured {}", record.amount),
            });
        }

        record.mark_refunded();
        state.refunds.push((transaction_id.to_string(), amount));
        Ok(())
    }

    async fn query(&self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>, PaymentError> {
        let mut state = self.state.lock().await;
        state.query_calls += 1;
        if state.fail_on_query {
            return Err(PaymentError::Unavailable {
                reason: "query service unavailable".to_string(),
            });
        }
        Ok(state.captures.get(key).cloned())
    }
}
