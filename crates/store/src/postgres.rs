use std::collections::HashMap;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{
    CatalogEntry, IdempotencyKey, Money, Order, OrderLine, OrderStatus, PaymentRecord,
    PaymentStatus, Recipient, StockLine, VariantKey,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Availability, Catalog, OrderRepository, PaymentRecordStore, Result, StockLedger, StoreError,
};

const ORDERS_PKEY: &str = "orders_pkey";
const STOCK_CHECK: &str = "variants_stock_check";

/// PostgreSQL-backed checkout storage.
///
/// Stock decrements are single conditional `UPDATE`s, so the database
/// serializes concurrent checkouts on the variant row.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a product variant together with its stock.
    pub async fn upsert_variant(
        &self,
        variant: &VariantKey,
        entry: &CatalogEntry,
        stock: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO products (id, title, price)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title, price = EXCLUDED.price
            "#,
        )
        .bind(variant.product_id.as_str())
        .bind(&entry.product_name)
        .bind(entry.unit_price.cents())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO variants (product_id, color_code, color_name, size, stock)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id, color_code, size)
            DO UPDATE SET color_name = EXCLUDED.color_name, stock = EXCLUDED.stock
            "#,
        )
        .bind(variant.product_id.as_str())
        .bind(&variant.color_code)
        .bind(&entry.color_name)
        .bind(&variant.size)
        .bind(stock)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    fn key_columns(variants: &[VariantKey]) -> (Vec<String>, Vec<String>, Vec<String>) {
        let mut products = Vec::with_capacity(variants.len());
        let mut colors = Vec::with_capacity(variants.len());
        let mut sizes = Vec::with_capacity(variants.len());
        for variant in variants {
            products.push(variant.product_id.as_str().to_string());
            colors.push(variant.color_code.clone());
            sizes.push(variant.size.clone());
        }
        (products, colors, sizes)
    }

    fn row_to_variant(row: &PgRow) -> Result<VariantKey> {
        Ok(VariantKey::new(
            row.try_get::<String, _>("product_id")?,
            row.try_get::<String, _>("color_code")?,
            row.try_get::<String, _>("size")?,
        ))
    }

    fn row_to_line(row: &PgRow) -> Result<OrderLine> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderLine {
            variant: Self::row_to_variant(row)?,
            name: row.try_get("name")?,
            color_name: row.try_get("color_name")?,
            unit_price: Money::from_cents(row.try_get("unit_price")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::Corrupt(format!("negative quantity {quantity}")))?,
        })
    }

    fn row_to_order(row: PgRow, lines: Vec<OrderLine>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let shipping: String = row.try_get("shipping")?;
        let payment: String = row.try_get("payment")?;
        let recipient: Json<Recipient> = row.try_get("recipient")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            status: status.parse().map_err(StoreError::Corrupt)?,
            recipient: recipient.0,
            shipping: shipping
                .parse()
                .map_err(|e: domain::ValidationError| StoreError::Corrupt(e.to_string()))?,
            payment: payment
                .parse()
                .map_err(|e: domain::ValidationError| StoreError::Corrupt(e.to_string()))?,
            subtotal: Money::from_cents(row.try_get("subtotal")?),
            freight: Money::from_cents(row.try_get("freight")?),
            total: Money::from_cents(row.try_get("total")?),
            transaction_id: row.try_get("transaction_id")?,
            created_at: row.try_get("created_at")?,
            lines,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<PaymentRecord> {
        let status: String = row.try_get("status")?;
        Ok(PaymentRecord {
            transaction_id: row.try_get("transaction_id")?,
            idempotency_key: IdempotencyKey::from_string(
                row.try_get::<String, _>("idempotency_key")?,
            ),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_cents(row.try_get("amount")?),
            status: status.parse::<PaymentStatus>().map_err(StoreError::Corrupt)?,
            captured_at: row.try_get("captured_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl StockLedger for PostgresStore {
    type Tx = Transaction<'static, Postgres>;

    async fn check_availability(&self, items: &[StockLine]) -> Result<Availability> {
        let lines = StockLine::consolidate(items.iter().cloned());
        let keys: Vec<VariantKey> = lines.iter().map(|line| line.variant.clone()).collect();
        let (products, colors, sizes) = Self::key_columns(&keys);

        let rows = sqlx::query(
            r#"
            SELECT r.product_id, r.color_code, r.size, v.stock
            FROM UNNEST($1::text[], $2::text[], $3::text[]) AS r(product_id, color_code, size)
            LEFT JOIN variants v USING (product_id, color_code, size)
            "#,
        )
        .bind(products)
        .bind(colors)
        .bind(sizes)
        .fetch_all(&self.pool)
        .await?;

        let mut stock: HashMap<VariantKey, Option<i64>> = HashMap::with_capacity(rows.len());
        for row in &rows {
            stock.insert(Self::row_to_variant(row)?, row.try_get("stock")?);
        }

        let unavailable = lines
            .into_iter()
            .filter(|line| {
                stock
                    .get(&line.variant)
                    .copied()
                    .flatten()
                    .is_none_or(|on_hand| on_hand < i64::from(line.quantity))
            })
            .map(|line| line.variant)
            .collect();
        Ok(Availability::from_unavailable(unavailable))
    }

    async fn reserve_and_decrement(&self, items: &[StockLine], tx: &mut Self::Tx) -> Result<()> {
        // Sorted keys: concurrent transactions lock variant rows in the same order.
        let lines = StockLine::consolidate(items.iter().cloned());
        let mut short = Vec::new();

        for line in &lines {
            let result = sqlx::query(
                r#"
                UPDATE variants SET stock = stock - $4
                WHERE product_id = $1 AND color_code = $2 AND size = $3 AND stock >= $4
                "#,
            )
            .bind(line.variant.product_id.as_str())
            .bind(&line.variant.color_code)
            .bind(&line.variant.size)
            .bind(i64::from(line.quantity))
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some(STOCK_CHECK)
                {
                    return StoreError::InsufficientStock {
                        variants: vec![line.variant.clone()],
                    };
                }
                StoreError::Database(e)
            })?;

            if result.rows_affected() == 0 {
                short.push(line.variant.clone());
            }
        }

        if !short.is_empty() {
            tracing::debug!(?short, "conditional decrement matched no row");
            return Err(StoreError::InsufficientStock { variants: short });
        }
        Ok(())
    }

    async fn restore(&self, items: &[StockLine], tx: &mut Self::Tx) -> Result<()> {
        for line in StockLine::consolidate(items.iter().cloned()) {
            let result = sqlx::query(
                r#"
                UPDATE variants SET stock = stock + $4
                WHERE product_id = $1 AND color_code = $2 AND size = $3
                "#,
            )
            .bind(line.variant.product_id.as_str())
            .bind(&line.variant.color_code)
            .bind(&line.variant.size)
            .bind(i64::from(line.quantity))
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::VariantNotFound(line.variant));
            }
        }
        Ok(())
    }

    async fn stock(&self, variant: &VariantKey) -> Result<Option<i64>> {
        let stock = sqlx::query_scalar(
            "SELECT stock FROM variants WHERE product_id = $1 AND color_code = $2 AND size = $3",
        )
        .bind(variant.product_id.as_str())
        .bind(&variant.color_code)
        .bind(&variant.size)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stock)
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        tx.rollback().await?;
        Ok(())
    }

    async fn insert(&self, order: &Order, tx: &mut Self::Tx) -> Result<OrderId> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, recipient, shipping, payment,
                                subtotal, freight, total, transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_i64())
        .bind(order.status.as_str())
        .bind(Json(&order.recipient))
        .bind(order.shipping.as_str())
        .bind(order.payment.as_str())
        .bind(order.subtotal.cents())
        .bind(order.freight.cents())
        .bind(order.total.cents())
        .bind(&order.transaction_id)
        .bind(order.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(ORDERS_PKEY)
            {
                return StoreError::DuplicateOrder(order.id);
            }
            StoreError::Database(e)
        })?;

        for (line_no, line) in order.lines.iter().enumerate() {
            let quantity = i32::try_from(line.quantity)
                .map_err(|_| StoreError::Corrupt(format!("quantity {} out of range", line.quantity)))?;

            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, line_no, product_id, color_code, size,
                                         name, color_name, unit_price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.variant.product_id.as_str())
            .bind(&line.variant.color_code)
            .bind(&line.variant.size)
            .bind(&line.name)
            .bind(&line.color_name)
            .bind(line.unit_price.cents())
            .bind(quantity)
            .execute(&mut **tx)
            .await?;
        }

        Ok(order.id)
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        tx: &mut Self::Tx,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(order_id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let actual: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?;

        match actual {
            None => Err(StoreError::OrderNotFound(order_id)),
            Some(actual) => Err(StoreError::StatusConflict {
                order_id,
                expected: from,
                actual: actual.parse().map_err(StoreError::Corrupt)?,
                to,
            }),
        }
    }

    async fn find(&self, order_id: OrderId) -> Result<Option<Order>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, user_id, status, recipient, shipping, payment,
                   subtotal, freight, total, transaction_id, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let lines = sqlx::query(
            r#"
            SELECT product_id, color_code, size, name, color_name, unit_price, quantity
            FROM order_lines
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(Self::row_to_line)
        .collect::<Result<Vec<_>>>()?;

        Self::row_to_order(row, lines).map(Some)
    }
}

#[async_trait]
impl Catalog for PostgresStore {
    async fn resolve(
        &self,
        variants: &[VariantKey],
    ) -> Result<HashMap<VariantKey, CatalogEntry>> {
        let (products, colors, sizes) = Self::key_columns(variants);

        let rows = sqlx::query(
            r#"
            SELECT v.product_id, v.color_code, v.size, p.title, v.color_name, p.price
            FROM UNNEST($1::text[], $2::text[], $3::text[]) AS r(product_id, color_code, size)
            JOIN variants v USING (product_id, color_code, size)
            JOIN products p ON p.id = v.product_id
            "#,
        )
        .bind(products)
        .bind(colors)
        .bind(sizes)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(VariantKey, CatalogEntry)> {
                Ok((
                    Self::row_to_variant(row)?,
                    CatalogEntry::new(
                        row.try_get::<String, _>("title")?,
                        row.try_get::<String, _>("color_name")?,
                        Money::from_cents(row.try_get("price")?),
                    ),
                ))
            })
            .collect()
    }
}

#[async_trait]
impl PaymentRecordStore for PostgresStore {
    async fn save(&self, record: &PaymentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_records (idempotency_key, transaction_id, order_id, amount,
                                         status, captured_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (idempotency_key) DO UPDATE
            SET transaction_id = EXCLUDED.transaction_id,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.idempotency_key.as_str())
        .bind(&record.transaction_id)
        .bind(record.order_id.as_uuid())
        .bind(record.amount.cents())
        .bind(record.status.as_str())
        .bind(record.captured_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(&self, record: &PaymentRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_records (idempotency_key, transaction_id, order_id, amount,
                                         status, captured_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.idempotency_key.as_str())
        .bind(&record.transaction_id)
        .bind(record.order_id.as_uuid())
        .bind(record.amount.cents())
        .bind(record.status.as_str())
        .bind(record.captured_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        key: &IdempotencyKey,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_records
            SET status = $3, updated_at = NOW()
            WHERE idempotency_key = $1 AND status = $2
            "#,
        )
        .bind(key.as_str())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT idempotency_key, transaction_id, order_id, amount, status, captured_at, updated_at
            FROM payment_records
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }
}
