//! Checkout orchestrator driving validation, capture, persistence and
//! compensation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::OrderId;
use domain::{
    CheckoutRequest, IdempotencyKey, Money, Order, OrderStatus, PaymentRecord, PaymentStatus,
    PriceQuote, VariantKey,
};
use store::{
    Catalog, OrderRepository, PaymentRecordStore, StockLedger, StoreError, with_transaction,
};
use tracing::{Level, Span, debug, error, info, warn};

use crate::error::{CheckoutError, PaymentError, Result};
use crate::gateway::{CaptureRequest, Cardholder, PaymentGateway};
use crate::retry::RetryPolicy;
use crate::state::CheckoutState;

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Retry policy for capture calls.
    pub retry: RetryPolicy,
    /// Upper bound for the order transaction. `None` waits indefinitely.
    pub storage_timeout: Option<Duration>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            storage_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Result of a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReceipt {
    pub order_id: OrderId,
    pub total: Money,
    pub transaction_id: String,
    pub payment_status: PaymentStatus,
    /// True when this call returned an order persisted by an earlier call.
    pub replayed: bool,
}

impl CheckoutReceipt {
    fn new(order: &Order, record: &PaymentRecord, replayed: bool) -> Self {
        Self {
            order_id: order.id,
            total: order.total,
            transaction_id: order.transaction_id.clone(),
            payment_status: record.status,
            replayed,
        }
    }
}

/// Result of an operator cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReceipt {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub refunded: Money,
}

/// Object-safe entry point used by the HTTP layer.
#[async_trait]
pub trait CheckoutService: Send + Sync {
    async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt>;

    async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<CancelReceipt>;
}

/// Drives one checkout from cart to persisted order.
///
/// The pipeline is strictly sequential per request:
/// validate → replay check → pre-check stock → capture → decrement + insert → receipt.
/// Money only moves at the capture step; every failure after it ends in a
/// refund or, if the refund fails too, in [`CheckoutError::CompensationFailed`].
pub struct CheckoutOrchestrator<C, L, R, P, G>
where
    C: Catalog,
    L: StockLedger,
    R: OrderRepository,
    P: PaymentRecordStore,
    G: PaymentGateway,
{
    catalog: C,
    ledger: L,
    orders: R,
    payments: P,
    gateway: G,
    config: CheckoutConfig,
}

impl<C, L, R, P, G> CheckoutOrchestrator<C, L, R, P, G>
where
    C: Catalog,
    L: StockLedger<Tx = <R as OrderRepository>::Tx> + Clone + 'static,
    R: OrderRepository + Clone + 'static,
    P: PaymentRecordStore,
    G: PaymentGateway,
{
    /// Creates a new checkout orchestrator.
    pub fn new(
        catalog: C,
        ledger: L,
        orders: R,
        payments: P,
        gateway: G,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            catalog,
            ledger,
            orders,
            payments,
            gateway,
            config,
        }
    }

    /// Runs the checkout pipeline for `request`.
    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            idempotency_key = tracing::field::Empty,
            order_id = tracing::field::Empty,
            transaction_id = tracing::field::Empty,
        )
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();
        let mut state = CheckoutState::default();

        let result = self.run(&request, &mut state).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(receipt) => {
                metrics::counter!("checkout_completed_total").increment(1);
                info!(
                    order_id = %receipt.order_id,
                    total = %receipt.total,
                    replayed = receipt.replayed,
                    "checkout completed"
                );
            }
            Err(err) => {
                let terminal = match state {
                    CheckoutState::Compensating | CheckoutState::PaymentCaptured => {
                        CheckoutState::Failed
                    }
                    _ => CheckoutState::Rejected,
                };
                advance(&mut state, terminal);
                metrics::counter!("checkout_rejected_total", "reason" => err.code()).increment(1);
                log_failure(err, state);
            }
        }

        result
    }

    async fn run(
        &self,
        request: &CheckoutRequest,
        state: &mut CheckoutState,
    ) -> Result<CheckoutReceipt> {
        request.validate()?;

        let key = IdempotencyKey::derive(request);
        let order_id = key.order_id();
        let span = Span::current();
        span.record("idempotency_key", key.as_str());
        span.record("order_id", tracing::field::display(order_id));

        // A finished attempt replays before stock is looked at: its units
        // are already taken, so a pre-check could only reject it.
        let existing = self.payments.find_by_key(&key).await?;
        match &existing {
            Some(record) if record.status.backs_order() => {
                if let Some(order) = self.orders.find(record.order_id).await? {
                    advance(state, CheckoutState::Completed);
                    return Ok(CheckoutReceipt::new(&order, record, true));
                }
            }
            Some(_) => {
                return Err(CheckoutError::DuplicateCheckout {
                    idempotency_key: key,
                });
            }
            None => {}
        }

        let variants: Vec<VariantKey> = request
            .stock_lines()
            .into_iter()
            .map(|line| line.variant)
            .collect();
        let entries = self.catalog.resolve(&variants).await?;
        let quote = PriceQuote::build(&request.lines, request.freight, &entries)?;

        let (record, resumed) = match existing {
            Some(record) if record.status == PaymentStatus::Captured => {
                (self.resume(state, record, &quote).await?, true)
            }
            Some(_) => {
                return Err(CheckoutError::DuplicateCheckout {
                    idempotency_key: key,
                });
            }
            None => (self.capture(state, request, &quote, &key).await?, false),
        };
        span.record("transaction_id", record.transaction_id.as_str());

        let order = Order::paid(order_id, request, &quote, record.transaction_id.clone());
        match self.persist(order).await {
            Ok(order) => {
                let record = self.release(record, resumed).await;
                advance(state, CheckoutState::OrderPersisted);
                advance(state, CheckoutState::Completed);
                Ok(CheckoutReceipt::new(&order, &record, false))
            }
            Err(StoreError::DuplicateOrder(_)) => {
                // A concurrent copy of this attempt owns the order and the
                // capture. Refunding here would refund its payment.
                let record = self.release(record, resumed).await;
                match self.orders.find(order_id).await? {
                    Some(order) => {
                        advance(state, CheckoutState::Completed);
                        Ok(CheckoutReceipt::new(&order, &record, true))
                    }
                    None => Err(CheckoutError::DuplicateCheckout {
                        idempotency_key: key,
                    }),
                }
            }
            Err(StoreError::InsufficientStock { variants }) => {
                let cause = CheckoutError::StockRaceLost { variants };
                Err(self.compensate(state, record, cause, true).await)
            }
            Err(err) => {
                let cause = CheckoutError::Persistence {
                    reason: err.to_string(),
                };
                Err(self.compensate(state, record, cause, true).await)
            }
        }
    }

    /// Pre-checks stock, captures, and stores the new payment record.
    async fn capture(
        &self,
        state: &mut CheckoutState,
        request: &CheckoutRequest,
        quote: &PriceQuote,
        key: &IdempotencyKey,
    ) -> Result<PaymentRecord> {
        let availability = self.ledger.check_availability(&quote.stock_lines()).await?;
        if !availability.available {
            return Err(CheckoutError::InsufficientStock {
                variants: availability.unavailable,
            });
        }
        advance(state, CheckoutState::StockChecked);

        let capture = CaptureRequest {
            token: request.payment_token.clone(),
            amount: quote.total(),
            idempotency_key: key.clone(),
            details: quote.details(),
            cardholder: Cardholder::from(&request.recipient),
        };
        let record = self.capture_with_retry(&capture, &self.config.retry).await?;
        advance(state, CheckoutState::PaymentCaptured);

        match self.payments.create(&record).await {
            Ok(true) => Ok(record),
            Ok(false) => {
                // A concurrent copy got the same capture back and recorded it
                // first. It owns the funds from here.
                info!(
                    transaction_id = %record.transaction_id,
                    "capture already recorded by a concurrent copy"
                );
                Err(CheckoutError::DuplicateCheckout {
                    idempotency_key: key.clone(),
                })
            }
            Err(err) => {
                let cause = CheckoutError::Persistence {
                    reason: format!("failed to record payment: {err}"),
                };
                Err(self.compensate(state, record, cause, false).await)
            }
        }
    }

    /// Claims a capture an earlier call never persisted and reuses its funds.
    async fn resume(
        &self,
        state: &mut CheckoutState,
        mut record: PaymentRecord,
        quote: &PriceQuote,
    ) -> Result<PaymentRecord> {
        let claimed = self
            .payments
            .transition(
                &record.idempotency_key,
                PaymentStatus::Captured,
                PaymentStatus::Resuming,
            )
            .await?;
        if !claimed {
            return Err(CheckoutError::DuplicateCheckout {
                idempotency_key: record.idempotency_key,
            });
        }
        record.status = PaymentStatus::Resuming;

        warn!(
            transaction_id = %record.transaction_id,
            "resuming checkout with an earlier capture"
        );
        advance(state, CheckoutState::PaymentCaptured);

        if record.amount != quote.total() {
            let cause = CheckoutError::Persistence {
                reason: format!(
                    "captured {} but the cart now totals {}",
                    record.amount,
                    quote.total()
                ),
            };
            return Err(self.compensate(state, record, cause, true).await);
        }
        Ok(record)
    }

    /// Hands a resumed capture back as a plain captured record.
    async fn release(&self, mut record: PaymentRecord, resumed: bool) -> PaymentRecord {
        if !resumed {
            return record;
        }
        if let Err(err) = self
            .payments
            .transition(
                &record.idempotency_key,
                PaymentStatus::Resuming,
                PaymentStatus::Captured,
            )
            .await
        {
            warn!(
                transaction_id = %record.transaction_id,
                error = %err,
                "failed to release resumed payment"
            );
        }
        record.status = PaymentStatus::Captured;
        record
    }

    /// Captures with bounded retries, always under the same idempotency key.
    ///
    /// Once an attempt ends without a known outcome, a later decline can no
    /// longer prove that nothing was charged and the result is unresolved.
    async fn capture_with_retry(
        &self,
        request: &CaptureRequest,
        policy: &RetryPolicy,
    ) -> Result<PaymentRecord> {
        let attempts = policy.attempts();
        let mut backoff = policy.backoff();
        let mut last_error = PaymentError::Timeout;
        let mut ambiguous = false;

        for attempt in 1..=attempts {
            metrics::counter!("payment_capture_attempts_total").increment(1);

            match self.gateway.capture(request).await {
                Ok(record) if record.is_captured() => {
                    if attempt > 1 {
                        info!(attempt, "capture succeeded after retry");
                    }
                    return Ok(record);
                }
                Ok(record) => return Err(settled_capture(request, &record)),
                Err(PaymentError::Declined { message }) if ambiguous => {
                    error!(
                        idempotency_key = %request.idempotency_key,
                        amount = %request.amount,
                        decline = %message,
                        "capture declined after an attempt with unknown outcome"
                    );
                    return Err(CheckoutError::PaymentUnresolved {
                        idempotency_key: request.idempotency_key.clone(),
                        reason: format!("declined after an unresolved attempt: {message}"),
                    });
                }
                Err(PaymentError::Declined { message }) => {
                    return Err(CheckoutError::PaymentDeclined { message });
                }
                Err(err @ (PaymentError::Timeout | PaymentError::Protocol(_))) => {
                    warn!(attempt, error = %err, "capture outcome unknown, querying gateway");
                    match self.gateway.query(&request.idempotency_key).await {
                        Ok(Some(record)) if record.is_captured() => {
                            info!(
                                attempt,
                                transaction_id = %record.transaction_id,
                                "adopting capture found by query"
                            );
                            return Ok(record);
                        }
                        Ok(Some(record)) => return Err(settled_capture(request, &record)),
                        Ok(None) => debug!(attempt, "no capture found by query"),
                        Err(query_err) => {
                            warn!(attempt, error = %query_err, "gateway query failed");
                            ambiguous = true;
                        }
                    }
                    last_error = err;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "capture failed");
                    last_error = err;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }

        error!(
            idempotency_key = %request.idempotency_key,
            amount = %request.amount,
            error = %last_error,
            "payment outcome unresolved after {attempts} attempts"
        );
        Err(CheckoutError::PaymentUnresolved {
            idempotency_key: request.idempotency_key.clone(),
            reason: last_error.to_string(),
        })
    }

    /// Inserts the order and takes its stock in one transaction.
    async fn persist(&self, order: Order) -> std::result::Result<Order, StoreError> {
        let ledger = self.ledger.clone();
        let orders = self.orders.clone();

        with_transaction(&self.orders, self.config.storage_timeout, move |tx| {
            Box::pin(async move {
                // Insert first so a concurrent copy of this attempt fails on
                // the order ID before it touches stock.
                orders.insert(&order, tx).await?;
                ledger.reserve_and_decrement(&order.stock_lines(), tx).await?;
                Ok(order)
            })
        })
        .await
    }

    /// Refunds a capture exactly once and returns the error to report.
    ///
    /// With `claim` set the stored record must move to `Refunding` first.
    /// Losing that race means a concurrent copy owns the capture, so nothing
    /// is refunded.
    async fn compensate(
        &self,
        state: &mut CheckoutState,
        mut record: PaymentRecord,
        cause: CheckoutError,
        claim: bool,
    ) -> CheckoutError {
        if claim {
            match self
                .payments
                .transition(
                    &record.idempotency_key,
                    record.status,
                    PaymentStatus::Refunding,
                )
                .await
            {
                Ok(true) => record.status = PaymentStatus::Refunding,
                Ok(false) => {
                    warn!(
                        transaction_id = %record.transaction_id,
                        cause = %cause,
                        "capture claimed by a concurrent copy, not refunding"
                    );
                    return CheckoutError::DuplicateCheckout {
                        idempotency_key: record.idempotency_key,
                    };
                }
                Err(err) => {
                    warn!(
                        transaction_id = %record.transaction_id,
                        error = %err,
                        "could not mark payment as refunding"
                    );
                }
            }
        }

        advance(state, CheckoutState::Compensating);
        warn!(
            transaction_id = %record.transaction_id,
            amount = %record.amount,
            cause = %cause,
            "refunding captured payment"
        );

        match self
            .gateway
            .refund(&record.transaction_id, record.amount)
            .await
        {
            Ok(()) => {
                metrics::counter!("checkout_compensations_total", "outcome" => "refunded")
                    .increment(1);
                record.mark_refunded();
                self.save_settled(&record).await;
                cause
            }
            Err(err) => {
                metrics::counter!("checkout_compensations_total", "outcome" => "refund_failed")
                    .increment(1);
                record.mark_refund_failed();
                self.save_settled(&record).await;
                error!(
                    transaction_id = %record.transaction_id,
                    amount = %record.amount,
                    idempotency_key = %record.idempotency_key,
                    cause = %cause,
                    error = %err,
                    "refund failed, captured funds have no order"
                );
                CheckoutError::CompensationFailed {
                    transaction_id: record.transaction_id,
                    amount: record.amount,
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn save_settled(&self, record: &PaymentRecord) {
        if let Err(err) = self.payments.save(record).await {
            error!(
                transaction_id = %record.transaction_id,
                status = %record.status,
                error = %err,
                "failed to record payment status"
            );
        }
    }

    /// Cancels a paid order: restores its stock, then refunds its payment.
    #[tracing::instrument(skip(self, order_id), fields(order_id = %order_id))]
    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<CancelReceipt> {
        let order = self
            .orders
            .find(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::Paid {
            return Err(CheckoutError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let ledger = self.ledger.clone();
        let orders = self.orders.clone();
        let lines = order.stock_lines();
        with_transaction(&self.orders, self.config.storage_timeout, move |tx| {
            Box::pin(async move {
                ledger.restore(&lines, tx).await?;
                orders
                    .update_status(order_id, OrderStatus::Paid, OrderStatus::Cancelled, tx)
                    .await?;
                Ok::<(), CheckoutError>(())
            })
        })
        .await?;
        metrics::counter!("checkout_cancellations_total").increment(1);
        info!(reason, "order cancelled, stock restored");

        let key = IdempotencyKey::from_order_id(order_id);
        let mut record = match self.payments.find_by_key(&key).await {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "could not load payment record");
                None
            }
        };

        match self.gateway.refund(&order.transaction_id, order.total).await {
            Ok(()) => {
                if let Some(record) = record.as_mut() {
                    record.mark_refunded();
                    self.save_settled(record).await;
                }
                Ok(CancelReceipt {
                    order_id,
                    status: OrderStatus::Cancelled,
                    refunded: order.total,
                })
            }
            Err(err) => {
                if let Some(record) = record.as_mut() {
                    record.mark_refund_failed();
                    self.save_settled(record).await;
                }
                error!(
                    transaction_id = %order.transaction_id,
                    amount = %order.total,
                    error = %err,
                    "refund for cancelled order failed"
                );
                Err(CheckoutError::CompensationFailed {
                    transaction_id: order.transaction_id,
                    amount: order.total,
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl<C, L, R, P, G> CheckoutService for CheckoutOrchestrator<C, L, R, P, G>
where
    C: Catalog,
    L: StockLedger<Tx = <R as OrderRepository>::Tx> + Clone + 'static,
    R: OrderRepository + Clone + 'static,
    P: PaymentRecordStore,
    G: PaymentGateway,
{
    async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        CheckoutOrchestrator::checkout(self, request).await
    }

    async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<CancelReceipt> {
        CheckoutOrchestrator::cancel_order(self, order_id, reason).await
    }
}

fn advance(state: &mut CheckoutState, next: CheckoutState) {
    if !state.can_transition_to(next) {
        warn!(from = %state, to = %next, "unexpected checkout transition");
    }
    debug!(from = %state, to = %next, "checkout transition");
    *state = next;
}

/// The gateway holds a capture for this attempt that was already refunded.
fn settled_capture(request: &CaptureRequest, record: &PaymentRecord) -> CheckoutError {
    warn!(
        transaction_id = %record.transaction_id,
        status = %record.status,
        "gateway returned a settled capture for this attempt"
    );
    CheckoutError::DuplicateCheckout {
        idempotency_key: request.idempotency_key.clone(),
    }
}

fn log_failure(err: &CheckoutError, state: CheckoutState) {
    let code = err.code();
    let level = err.severity();
    if level == Level::ERROR {
        error!(code, %state, error = %err, "checkout failed, operator action required");
    } else if level == Level::WARN {
        warn!(code, %state, error = %err, "checkout failed");
    } else {
        info!(code, %state, error = %err, "checkout rejected");
    }
}
