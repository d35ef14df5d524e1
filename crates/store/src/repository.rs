//! The order repository contract and scoped transactions.

use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{Order, OrderStatus};
use futures_util::future::BoxFuture;

use crate::{Result, StoreError};

/// Durable, transactional persistence of orders and their lines.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Transaction handle, shared with the stock ledger.
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    async fn rollback(&self, tx: Self::Tx) -> Result<()>;

    /// Inserts the order header and all of its lines inside `tx`.
    async fn insert(&self, order: &Order, tx: &mut Self::Tx) -> Result<OrderId>;

    /// Moves an order from `from` to `to` inside `tx`.
    async fn update_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        tx: &mut Self::Tx,
    ) -> Result<()>;

    /// Loads a committed order.
    async fn find(&self, order_id: OrderId) -> Result<Option<Order>>;
}

/// Runs `work` inside a fresh transaction of `repo`.
///
/// Commits only if `work` returns `Ok`; any error out of `work`, including
/// exceeding `limit`, rolls the transaction back. A failed commit is
/// reported as an error.
#[tracing::instrument(skip(repo, work))]
pub async fn with_transaction<R, T, E, F>(
    repo: &R,
    limit: Option<Duration>,
    work: F,
) -> std::result::Result<T, E>
where
    R: OrderRepository + ?Sized,
    E: From<StoreError> + std::fmt::Display,
    F: for<'t> FnOnce(&'t mut R::Tx) -> BoxFuture<'t, std::result::Result<T, E>>,
{
    let mut tx = repo.begin().await?;

    let outcome = match limit {
        Some(limit) => match tokio::time::timeout(limit, work(&mut tx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(limit_ms = limit.as_millis() as u64, "transaction timed out");
                Err(E::from(StoreError::Timeout))
            }
        },
        None => work(&mut tx).await,
    };

    match outcome {
        Ok(value) => {
            if let Err(err) = repo.commit(tx).await {
                metrics::counter!("store_transactions_total", "outcome" => "commit_failed")
                    .increment(1);
                return Err(err.into());
            }
            metrics::counter!("store_transactions_total", "outcome" => "committed").increment(1);
            Ok(value)
        }
        Err(err) => {
            metrics::counter!("store_transactions_total", "outcome" => "rolled_back").increment(1);
            tracing::debug!(error = %err, "rolling back transaction");
            if let Err(rollback_err) = repo.rollback(tx).await {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
