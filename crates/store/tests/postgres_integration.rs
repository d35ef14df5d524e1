//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use common::{OrderId, UserId};
use domain::{
    CatalogEntry, IdempotencyKey, Money, Order, OrderLine, OrderStatus, PaymentMethod,
    PaymentRecord, PaymentStatus, Recipient, ShippingMethod, StockLine, VariantKey,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    Catalog, OrderRepository, PaymentRecordStore, PostgresStore, StockLedger, StoreError,
    with_transaction,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkout_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store with its own pool, cleared tables and one seeded variant
async fn get_test_store(stock: i64) -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_lines, orders, payment_records, variants, products")
        .execute(&pool)
        .await
        .unwrap();

    let store = PostgresStore::new(pool);
    store
        .upsert_variant(&dress(), &CatalogEntry::new("Dress", "White", Money::from_cents(79900)), stock)
        .await
        .unwrap();
    store
}

fn dress() -> VariantKey {
    VariantKey::new("201807201824", "FFFFFF", "S")
}

fn paid_order(id: OrderId, quantity: u32) -> Order {
    let unit_price = Money::from_cents(79900);
    let freight = Money::from_cents(6000);
    let line = OrderLine {
        variant: dress(),
        name: "Dress".to_string(),
        color_name: "White".to_string(),
        unit_price,
        quantity,
    };
    let subtotal = line.total_price();
    Order {
        id,
        user_id: UserId::new(42),
        status: OrderStatus::Paid,
        recipient: Recipient {
            name: "Luke".to_string(),
            phone: "0987654321".to_string(),
            email: "luke@example.com".to_string(),
            address: "Taipei".to_string(),
            delivery_time: Some("morning".to_string()),
        },
        shipping: ShippingMethod::Delivery,
        payment: PaymentMethod::CreditCard,
        subtotal,
        freight,
        total: subtotal + freight,
        transaction_id: "D20240101ABC".to_string(),
        created_at: chrono::Utc::now(),
        lines: vec![line],
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn resolve_and_check_availability() {
    let store = get_test_store(3).await;
    let missing = VariantKey::new("nope", "000000", "XL");

    let resolved = store.resolve(&[dress(), missing.clone()]).await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[&dress()].product_name, "Dress");
    assert_eq!(resolved[&dress()].unit_price, Money::from_cents(79900));

    let availability = store
        .check_availability(&[StockLine::new(dress(), 3)])
        .await
        .unwrap();
    assert!(availability.available);

    let availability = store
        .check_availability(&[StockLine::new(dress(), 4), StockLine::new(missing.clone(), 1)])
        .await
        .unwrap();
    assert!(!availability.available);
    assert_eq!(availability.unavailable, vec![dress(), missing]);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn order_and_decrement_commit_together() {
    let store = get_test_store(5).await;
    let id = OrderId::new();

    let ledger = store.clone();
    let repo = store.clone();
    let order = paid_order(id, 2);
    let inserted: Result<OrderId, StoreError> = with_transaction(&store, None, move |tx| {
        Box::pin(async move {
            ledger
                .reserve_and_decrement(&order.stock_lines(), tx)
                .await?;
            repo.insert(&order, tx).await
        })
    })
    .await;

    assert_eq!(inserted.unwrap(), id);
    assert_eq!(store.stock(&dress()).await.unwrap(), Some(3));

    let loaded = store.find(id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Paid);
    assert_eq!(loaded.lines.len(), 1);
    assert_eq!(loaded.total, loaded.computed_total());
    assert_eq!(loaded.recipient.delivery_time.as_deref(), Some("morning"));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn insufficient_stock_rolls_back_everything() {
    let store = get_test_store(1).await;
    let id = OrderId::new();

    let ledger = store.clone();
    let repo = store.clone();
    let order = paid_order(id, 2);
    let result: Result<OrderId, StoreError> = with_transaction(&store, None, move |tx| {
        Box::pin(async move {
            ledger
                .reserve_and_decrement(&order.stock_lines(), tx)
                .await?;
            repo.insert(&order, tx).await
        })
    })
    .await;

    assert!(matches!(result, Err(StoreError::InsufficientStock { .. })));
    assert_eq!(store.stock(&dress()).await.unwrap(), Some(1));
    assert!(store.find(id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn concurrent_decrements_never_oversell() {
    let store = get_test_store(3).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut tx = OrderRepository::begin(&store).await.unwrap();
            match store
                .reserve_and_decrement(&[StockLine::new(dress(), 1)], &mut tx)
                .await
            {
                Ok(()) => {
                    store.commit(tx).await.unwrap();
                    true
                }
                Err(_) => {
                    store.rollback(tx).await.unwrap();
                    false
                }
            }
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 3);
    assert_eq!(store.stock(&dress()).await.unwrap(), Some(0));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn duplicate_order_id_rejected() {
    let store = get_test_store(5).await;
    let id = OrderId::new();

    let mut tx = OrderRepository::begin(&store).await.unwrap();
    store.insert(&paid_order(id, 1), &mut tx).await.unwrap();
    store.commit(tx).await.unwrap();

    let mut tx = OrderRepository::begin(&store).await.unwrap();
    let err = store.insert(&paid_order(id, 1), &mut tx).await.unwrap_err();
    store.rollback(tx).await.unwrap();
    assert!(matches!(err, StoreError::DuplicateOrder(dup) if dup == id));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn cancel_restores_stock_and_checks_status() {
    let store = get_test_store(5).await;
    let id = OrderId::new();

    let mut tx = OrderRepository::begin(&store).await.unwrap();
    store
        .reserve_and_decrement(&[StockLine::new(dress(), 2)], &mut tx)
        .await
        .unwrap();
    store.insert(&paid_order(id, 2), &mut tx).await.unwrap();
    store.commit(tx).await.unwrap();

    let mut tx = OrderRepository::begin(&store).await.unwrap();
    store
        .restore(&[StockLine::new(dress(), 2)], &mut tx)
        .await
        .unwrap();
    store
        .update_status(id, OrderStatus::Paid, OrderStatus::Cancelled, &mut tx)
        .await
        .unwrap();
    store.commit(tx).await.unwrap();

    assert_eq!(store.stock(&dress()).await.unwrap(), Some(5));
    assert_eq!(
        store.find(id).await.unwrap().unwrap().status,
        OrderStatus::Cancelled
    );

    let mut tx = OrderRepository::begin(&store).await.unwrap();
    let err = store
        .update_status(id, OrderStatus::Paid, OrderStatus::Cancelled, &mut tx)
        .await
        .unwrap_err();
    store.rollback(tx).await.unwrap();
    assert!(matches!(
        err,
        StoreError::StatusConflict {
            actual: OrderStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn payment_record_upsert() {
    let store = get_test_store(1).await;
    let key = IdempotencyKey::from_string("0123456789abcdef0123456789abcdef");

    let mut record = PaymentRecord::captured("TXN-1", key.clone(), Money::from_cents(85900));
    store.save(&record).await.unwrap();

    let loaded = store.find_by_key(&key).await.unwrap().unwrap();
    assert_eq!(loaded.status, PaymentStatus::Captured);
    assert_eq!(loaded.order_id, key.order_id());
    assert_eq!(loaded.amount, Money::from_cents(85900));

    record.mark_refunded();
    store.save(&record).await.unwrap();
    let loaded = store.find_by_key(&key).await.unwrap().unwrap();
    assert_eq!(loaded.status, PaymentStatus::Refunded);

    let unknown = IdempotencyKey::from_string("ffffffffffffffffffffffffffffffff");
    assert!(store.find_by_key(&unknown).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn payment_record_claims() {
    let store = get_test_store(1).await;
    let key = IdempotencyKey::from_string("00000000000000000000000000000abc");

    let record = PaymentRecord::captured("TXN-A", key.clone(), Money::from_cents(1658));
    assert!(store.create(&record).await.unwrap());
    let second = PaymentRecord::captured("TXN-B", key.clone(), Money::from_cents(1658));
    assert!(!store.create(&second).await.unwrap());

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

    let loaded = store.find_by_key(&key).await.unwrap().unwrap();
    assert_eq!(loaded.transaction_id, "TXN-A");
    assert_eq!(loaded.status, PaymentStatus::Refunding);
}
