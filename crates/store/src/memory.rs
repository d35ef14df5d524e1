use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{
    CatalogEntry, IdempotencyKey, Order, OrderStatus, PaymentRecord, PaymentStatus, StockLine,
    VariantKey,
};
use tokio::sync::RwLock;

use crate::{
    Availability, Catalog, OrderRepository, PaymentRecordStore, Result, StockLedger, StoreError,
};

#[derive(Debug, Default)]
struct InMemoryState {
    stock: HashMap<VariantKey, i64>,
    catalog: HashMap<VariantKey, CatalogEntry>,
    orders: HashMap<OrderId, Order>,
    /// Order IDs inserted by transactions that have not finished yet.
    in_flight: HashSet<OrderId>,
    payments: HashMap<IdempotencyKey, PaymentRecord>,
    fail_on_insert: bool,
    fail_on_commit: bool,
    insert_delay: Option<Duration>,
}

/// Transaction handle for [`InMemoryStore`].
///
/// Decrements are applied to shared stock immediately, under the store lock,
/// so a concurrent transaction can never take the same units. They are
/// journaled and reverted on rollback. Restores, inserts and status changes
/// are staged and only become visible on commit. Inserted order IDs are
/// claimed at insert time, so two open transactions cannot insert the same
/// order.
#[derive(Debug)]
pub struct InMemoryTx {
    id: u64,
    decremented: Vec<StockLine>,
    restored: Vec<StockLine>,
    inserted: Vec<Order>,
    status_changes: Vec<(OrderId, OrderStatus)>,
}

impl InMemoryTx {
    fn new(id: u64) -> Self {
        Self {
            id,
            decremented: Vec::new(),
            restored: Vec::new(),
            inserted: Vec::new(),
            status_changes: Vec::new(),
        }
    }

    fn staged_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.status_changes
            .iter()
            .rev()
            .find(|(id, _)| *id == order_id)
            .map(|(_, status)| *status)
    }
}

/// In-memory checkout storage for testing and local development.
///
/// Implements every storage contract of this crate over one shared state, so
/// the ledger and the repository see the same transactions, exactly as they
/// would over one database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<InMemoryState>>,
    next_tx: Arc<AtomicU64>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variant in the catalog with its initial stock.
    pub async fn add_variant(&self, variant: VariantKey, entry: CatalogEntry, stock: i64) {
        let mut state = self.state.write().await;
        state.catalog.insert(variant.clone(), entry);
        state.stock.insert(variant, stock.max(0));
    }

    /// Overwrites the stock of a variant.
    pub async fn set_stock(&self, variant: &VariantKey, stock: i64) {
        self.state
            .write()
            .await
            .stock
            .insert(variant.clone(), stock.max(0));
    }

    /// Configures inserts to fail.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    /// Configures commits to fail.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }

    /// Delays every insert, to exercise transaction timeouts.
    pub async fn set_insert_delay(&self, delay: Option<Duration>) {
        self.state.write().await.insert_delay = delay;
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns every committed order.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.read().await.orders.values().cloned().collect()
    }

    /// Returns every payment record.
    pub async fn payment_records(&self) -> Vec<PaymentRecord> {
        self.state.read().await.payments.values().cloned().collect()
    }

    fn release(state: &mut InMemoryState, tx: &InMemoryTx) {
        for order in &tx.inserted {
            state.in_flight.remove(&order.id);
        }
    }

    fn revert_decrements(state: &mut InMemoryState, lines: &[StockLine]) {
        for line in lines {
            if let Some(stock) = state.stock.get_mut(&line.variant) {
                *stock += i64::from(line.quantity);
            }
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryStore {
    type Tx = InMemoryTx;

    async fn check_availability(&self, items: &[StockLine]) -> Result<Availability> {
        let state = self.state.read().await;
        let unavailable = StockLine::consolidate(items.iter().cloned())
            .into_iter()
            .filter(|line| {
                state
                    .stock
                    .get(&line.variant)
                    .is_none_or(|stock| *stock < i64::from(line.quantity))
            })
            .map(|line| line.variant)
            .collect();
        Ok(Availability::from_unavailable(unavailable))
    }

    async fn reserve_and_decrement(&self, items: &[StockLine], tx: &mut InMemoryTx) -> Result<()> {
        let lines = StockLine::consolidate(items.iter().cloned());
        let mut state = self.state.write().await;

        // Check and apply under one lock: the whole reservation succeeds or
        // nothing is taken.
        let short: Vec<VariantKey> = lines
            .iter()
            .filter(|line| {
                state
                    .stock
                    .get(&line.variant)
                    .is_none_or(|stock| *stock < i64::from(line.quantity))
            })
            .map(|line| line.variant.clone())
            .collect();
        if !short.is_empty() {
            tracing::debug!(tx = tx.id, ?short, "conditional decrement matched no row");
            return Err(StoreError::InsufficientStock { variants: short });
        }

        for line in &lines {
            if let Some(stock) = state.stock.get_mut(&line.variant) {
                *stock -= i64::from(line.quantity);
            }
        }
        tx.decremented.extend(lines);
        Ok(())
    }

    async fn restore(&self, items: &[StockLine], tx: &mut InMemoryTx) -> Result<()> {
        let state = self.state.read().await;
        for line in items {
            if !state.stock.contains_key(&line.variant) {
                return Err(StoreError::VariantNotFound(line.variant.clone()));
            }
        }
        tx.restored.extend(items.iter().cloned());
        Ok(())
    }

    async fn stock(&self, variant: &VariantKey) -> Result<Option<i64>> {
        Ok(self.state.read().await.stock.get(variant).copied())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx> {
        Ok(InMemoryTx::new(self.next_tx.fetch_add(1, Ordering::Relaxed)))
    }

    async fn commit(&self, tx: InMemoryTx) -> Result<()> {
        let mut state = self.state.write().await;
        Self::release(&mut state, &tx);

        if state.fail_on_commit {
            Self::revert_decrements(&mut state, &tx.decremented);
            return Err(StoreError::Unavailable("commit failed".to_string()));
        }

        for line in &tx.restored {
            if let Some(stock) = state.stock.get_mut(&line.variant) {
                *stock += i64::from(line.quantity);
            }
        }
        for order in tx.inserted {
            state.orders.insert(order.id, order);
        }
        for (order_id, status) in tx.status_changes {
            if let Some(order) = state.orders.get_mut(&order_id) {
                order.status = status;
            }
        }
        Ok(())
    }

    async fn rollback(&self, tx: InMemoryTx) -> Result<()> {
        let mut state = self.state.write().await;
        Self::release(&mut state, &tx);
        Self::revert_decrements(&mut state, &tx.decremented);
        Ok(())
    }

    async fn insert(&self, order: &Order, tx: &mut InMemoryTx) -> Result<OrderId> {
        let delay = self.state.read().await.insert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state.fail_on_insert {
            return Err(StoreError::Unavailable("insert failed".to_string()));
        }
        // An uncommitted insert of the same ID conflicts too, as a primary
        // key would once the other transaction commits.
        if state.orders.contains_key(&order.id) || !state.in_flight.insert(order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }

        tx.inserted.push(order.clone());
        Ok(order.id)
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        tx: &mut InMemoryTx,
    ) -> Result<()> {
        let state = self.state.read().await;
        let committed = state
            .orders
            .get(&order_id)
            .map(|order| order.status)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        let actual = tx.staged_status(order_id).unwrap_or(committed);

        if actual != from {
            return Err(StoreError::StatusConflict {
                order_id,
                expected: from,
                actual,
                to,
            });
        }

        tx.status_changes.push((order_id, to));
        Ok(())
    }

    async fn find(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn resolve(
        &self,
        variants: &[VariantKey],
    ) -> Result<HashMap<VariantKey, CatalogEntry>> {
        let state = self.state.read().await;
        Ok(variants
            .iter()
            .filter_map(|key| {
                state
                    .catalog
                    .get(key)
                    .map(|entry| (key.clone(), entry.clone()))
            })
            .collect())
    }
}

#[async_trait]
impl PaymentRecordStore for InMemoryStore {
    async fn save(&self, record: &PaymentRecord) -> Result<()> {
        self.state
            .write()
            .await
            .payments
            .insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn create(&self, record: &PaymentRecord) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.payments.contains_key(&record.idempotency_key) {
            return Ok(false);
        }
        state
            .payments
            .insert(record.idempotency_key.clone(), record.clone());
        Ok(true)
    }

    async fn transition(
        &self,
        key: &IdempotencyKey,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.payments.get_mut(key) {
            Some(record) if record.status == from => {
                record.status = to;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>> {
        Ok(self.state.read().await.payments.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use common::UserId;
    use domain::{Money, PaymentMethod, Recipient, ShippingMethod};

    use super::*;
    use crate::with_transaction;

    fn variant() -> VariantKey {
        VariantKey::new("201807201824", "FFFFFF", "S")
    }

    async fn store_with_stock(stock: i64) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .add_variant(
                variant(),
                CatalogEntry::new("Dress", "White", Money::from_cents(79900)),
                stock,
            )
            .await;
        store
    }

    fn order(id: OrderId) -> Order {
        Order {
            id,
            user_id: UserId::new(1),
            status: OrderStatus::Paid,
            recipient: Recipient {
                name: "Luke".to_string(),
                phone: "0911".to_string(),
                email: "luke@example.com".to_string(),
                address: "Taipei".to_string(),
                delivery_time: None,
            },
            shipping: ShippingMethod::Delivery,
            payment: PaymentMethod::CreditCard,
            subtotal: Money::from_cents(79900),
            freight: Money::zero(),
            total: Money::from_cents(79900),
            transaction_id: "TXN-1".to_string(),
            created_at: chrono::Utc::now(),
            lines: vec![],
        }
    }

    #[tokio::test]
    async fn test_availability_reports_short_and_unknown_variants() {
        let store = store_with_stock(1).await;
        let unknown = VariantKey::new("nope", "000000", "XL");

        let ok = store
            .check_availability(&[StockLine::new(variant(), 1)])
            .await
            .unwrap();
        assert!(ok.available);

        let short = store
            .check_availability(&[
                StockLine::new(variant(), 2),
                StockLine::new(unknown.clone(), 1),
            ])
            .await
            .unwrap();
        assert!(!short.available);
        assert_eq!(short.unavailable, vec![variant(), unknown]);
    }

    #[tokio::test]
    async fn test_decrement_is_conditional() {
        let store = store_with_stock(2).await;
        let mut tx = OrderRepository::begin(&store).await.unwrap();

        store
            .reserve_and_decrement(&[StockLine::new(variant(), 2)], &mut tx)
            .await
            .unwrap();
        let err = store
            .reserve_and_decrement(&[StockLine::new(variant(), 1)], &mut tx)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }));

        store.commit(tx).await.unwrap();
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_rollback_returns_decremented_stock() {
        let store = store_with_stock(5).await;
        let mut tx = OrderRepository::begin(&store).await.unwrap();
        store
            .reserve_and_decrement(&[StockLine::new(variant(), 3)], &mut tx)
            .await
            .unwrap();
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(2));

        store.rollback(tx).await.unwrap();
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_insert_visible_only_after_commit() {
        let store = store_with_stock(5).await;
        let id = OrderId::new();
        let mut tx = OrderRepository::begin(&store).await.unwrap();
        store.insert(&order(id), &mut tx).await.unwrap();
        assert!(store.find(id).await.unwrap().is_none());

        store.commit(tx).await.unwrap();
        assert!(store.find(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_order_rejected() {
        let store = store_with_stock(5).await;
        let id = OrderId::new();
        let mut tx = OrderRepository::begin(&store).await.unwrap();
        store.insert(&order(id), &mut tx).await.unwrap();
        store.commit(tx).await.unwrap();

        let mut tx = OrderRepository::begin(&store).await.unwrap();
        let err = store.insert(&order(id), &mut tx).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrder(dup) if dup == id));
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_error() {
        let store = store_with_stock(5).await;
        store.set_fail_on_insert(true).await;

        let ledger = store.clone();
        let repo = store.clone();
        let result: std::result::Result<OrderId, StoreError> =
            with_transaction(&store, None, move |tx| {
                Box::pin(async move {
                    ledger
                        .reserve_and_decrement(&[StockLine::new(variant(), 4)], tx)
                        .await?;
                    repo.insert(&order(OrderId::new()), tx).await
                })
            })
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(5));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_with_transaction_times_out() {
        let store = store_with_stock(5).await;
        store
            .set_insert_delay(Some(Duration::from_millis(200)))
            .await;

        let ledger = store.clone();
        let repo = store.clone();
        let result: std::result::Result<OrderId, StoreError> =
            with_transaction(&store, Some(Duration::from_millis(20)), move |tx| {
                Box::pin(async move {
                    ledger
                        .reserve_and_decrement(&[StockLine::new(variant(), 1)], tx)
                        .await?;
                    repo.insert(&order(OrderId::new()), tx).await
                })
            })
            .await;

        assert!(matches!(result, Err(StoreError::Timeout)));
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(5));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_reverts_decrement() {
        let store = store_with_stock(5).await;
        store.set_fail_on_commit(true).await;
        let mut tx = OrderRepository::begin(&store).await.unwrap();
        store
            .reserve_and_decrement(&[StockLine::new(variant(), 2)], &mut tx)
            .await
            .unwrap();

        assert!(store.commit(tx).await.is_err());
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_restore_and_status_change_commit_together() {
        let store = store_with_stock(0).await;
        let id = OrderId::new();
        let mut tx = OrderRepository::begin(&store).await.unwrap();
        store.insert(&order(id), &mut tx).await.unwrap();
        store.commit(tx).await.unwrap();

        let mut tx = OrderRepository::begin(&store).await.unwrap();
        store
            .restore(&[StockLine::new(variant(), 3)], &mut tx)
            .await
            .unwrap();
        store
            .update_status(id, OrderStatus::Paid, OrderStatus::Cancelled, &mut tx)
            .await
            .unwrap();
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(0));

        store.commit(tx).await.unwrap();
        assert_eq!(store.stock(&variant()).await.unwrap(), Some(3));
        assert_eq!(
            store.find(id).await.unwrap().unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_status_conflict() {
        let store = store_with_stock(0).await;
        let id = OrderId::new();
        let mut tx = OrderRepository::begin(&store).await.unwrap();
        store.insert(&order(id), &mut tx).await.unwrap();
        store.commit(tx).await.unwrap();

        let mut tx = OrderRepository::begin(&store).await.unwrap();
        let err = store
            .update_status(id, OrderStatus::Pending, OrderStatus::Paid, &mut tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StatusConflict {
                actual: OrderStatus::Paid,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_catalog_and_payment_records() {
        let store = store_with_stock(1).await;
        let unknown = VariantKey::new("nope", "000000", "XL");
        let resolved = store.resolve(&[variant(), unknown]).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&variant()].unit_price.cents(), 79900);

        let key = IdempotencyKey::from_string("00112233445566778899aabbccddeeff");
        let mut record = PaymentRecord::captured("TXN-9", key.clone(), Money::from_cents(100));
        store.save(&record).await.unwrap();
        record.mark_refunded();
        store.save(&record).await.unwrap();

        let loaded = store.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(loaded.status, PaymentStatus::Refunded);
        assert_eq!(store.payment_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_payment_ownership_is_claimed_once() {
        let store = InMemoryStore::new();
        let key = IdempotencyKey::from_string("ffeeddccbbaa99887766554433221100");
        let record = PaymentRecord::captured("TXN-1", key.clone(), Money::from_cents(100));
        assert!(store.create(&record).await.unwrap());

        let other = PaymentRecord::captured("TXN-2", key.clone(), Money::from_cents(100));
        assert!(!store.create(&other).await.unwrap());
        let kept = store.find_by_key(&key).await.unwrap().unwrap();
        assert_eq!(kept.transaction_id, "TXN-1");

        assert!(
            store
                .transition(&key, PaymentStatus::Captured, PaymentStatus::Refunding)
                .await
                .unwrap()
        );
        assert!(
            !store
                .transition(&key, PaymentStatus::Captured, PaymentStatus::Resuming)
                .await
                .unwrap()
        );
        let missing = IdempotencyKey::from_string("0000");
        assert!(
            !store
                .transition(&missing, PaymentStatus::Captured, PaymentStatus::Refunding)
                .await
                .unwrap()
        );
        assert_eq!(
            store.find_by_key(&key).await.unwrap().unwrap().status,
            PaymentStatus::Refunding
        );
    }
}
