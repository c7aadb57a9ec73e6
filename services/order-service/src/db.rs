// =============================================================================
// DATABASE MODULE
// =============================================================================
// PostgreSQL implementation of the persistence gateway.
//
// NOTES:
// - One pooled connection per request; multi-row writes use a transaction
// - Rows read inside a transaction that are about to be changed are locked
//   with FOR UPDATE (stock entries at placement, the order at cancellation)
// - A sqlx Transaction that is dropped without commit rolls back
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};

use crate::models::{
    CourierApproval, CourierContact, FulfillmentStatus, Order, OrderDetail, OrderLine,
    OrderRecipient, PaymentStatus, Subscriber,
};
use crate::store::{AssignOutcome, OrderFilter, Store, StoreResult, StoreTx};

const ORDER_COLUMNS: &str =
    "id, user_id, total, payment_provider, payment_status, status, courier_id, created_at";

// -----------------------------------------------------------------------------
// DATABASE WRAPPER
// -----------------------------------------------------------------------------
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    // -------------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------------
    /// Create the schema if it does not exist yet. Safe to run on every start.
    pub async fn run_migrations(&self) -> Result<()> {
        let statements: [(&str, &str); 9] = [
            (
                "users",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id BIGSERIAL PRIMARY KEY,
                    email VARCHAR(255) UNIQUE NOT NULL,
                    first_name VARCHAR(100) NOT NULL DEFAULT '',
                    newsletter BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "couriers",
                r#"
                CREATE TABLE IF NOT EXISTS couriers (
                    id BIGSERIAL PRIMARY KEY,
                    email VARCHAR(255) UNIQUE NOT NULL,
                    name VARCHAR(255) NOT NULL,
                    status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    CONSTRAINT courier_status CHECK (status IN ('pending', 'approved', 'rejected'))
                )
                "#,
            ),
            (
                "product",
                r#"
                CREATE TABLE IF NOT EXISTS product (
                    id BIGSERIAL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    price NUMERIC(12, 2) NOT NULL,
                    CONSTRAINT non_negative_price CHECK (price >= 0)
                )
                "#,
            ),
            (
                "product_sizes",
                r#"
                CREATE TABLE IF NOT EXISTS product_sizes (
                    product_id BIGINT NOT NULL REFERENCES product(id),
                    size_id BIGINT NOT NULL,
                    quantity INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (product_id, size_id),
                    CONSTRAINT non_negative_stock CHECK (quantity >= 0)
                )
                "#,
            ),
            (
                "orders",
                r#"
                CREATE TABLE IF NOT EXISTS orders (
                    id BIGSERIAL PRIMARY KEY,
                    user_id BIGINT NOT NULL REFERENCES users(id),
                    total NUMERIC(12, 2) NOT NULL DEFAULT 0,
                    payment_provider VARCHAR(100) NOT NULL,
                    payment_status VARCHAR(50) NOT NULL DEFAULT 'pending',
                    status VARCHAR(30) NOT NULL DEFAULT 'placed',
                    -- No foreign key: the courier id comes from a verified token
                    courier_id BIGINT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CONSTRAINT non_negative_total CHECK (total >= 0)
                )
                "#,
            ),
            (
                "order_item",
                r#"
                CREATE TABLE IF NOT EXISTS order_item (
                    id BIGSERIAL PRIMARY KEY,
                    order_id BIGINT NOT NULL REFERENCES orders(id),
                    product_id BIGINT NOT NULL REFERENCES product(id),
                    size_id BIGINT NOT NULL,
                    quantity INTEGER NOT NULL,
                    unit_price NUMERIC(12, 2) NOT NULL,
                    CONSTRAINT positive_quantity CHECK (quantity > 0)
                )
                "#,
            ),
            (
                "orders user index",
                "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id)",
            ),
            (
                "orders created_at index",
                "CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at)",
            ),
            (
                "order_item order index",
                "CREATE INDEX IF NOT EXISTS idx_order_item_order ON order_item(order_id)",
            ),
        ];

        for (name, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {name}"))?;
        }

        self.seed_sample_data().await?;

        Ok(())
    }

    /// Seed a small catalogue with stock when the product table is empty
    async fn seed_sample_data(&self) -> Result<()> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM product")
            .fetch_one(&self.pool)
            .await?;

        if count.0 > 0 {
            return Ok(());
        }

        let sample_products: [(&str, Decimal, [(i64, i32); 2]); 3] = [
            ("Canvas Sneaker", Decimal::new(4999, 2), [(1, 20), (2, 15)]),
            ("Linen Shirt", Decimal::new(2950, 2), [(1, 40), (2, 35)]),
            ("Wool Beanie", Decimal::new(1999, 2), [(1, 60), (2, 0)]),
        ];

        let mut tx = self.pool.begin().await?;
        for (name, price, sizes) in sample_products {
            let (product_id,): (i64,) =
                sqlx::query_as("INSERT INTO product (name, price) VALUES ($1, $2) RETURNING id")
                    .bind(name)
                    .bind(price)
                    .fetch_one(&mut *tx)
                    .await?;

            for (size_id, quantity) in sizes {
                sqlx::query(
                    "INSERT INTO product_sizes (product_id, size_id, quantity) VALUES ($1, $2, $3)",
                )
                .bind(product_id)
                .bind(size_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ROW MAPPING
// -----------------------------------------------------------------------------
// Status columns are TEXT; they are parsed into the closed enums here so a bad
// value surfaces as a decode error instead of leaking into the workflow.

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    total: Decimal,
    payment_provider: String,
    payment_status: String,
    status: String,
    courier_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = sqlx::Error;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            total: row.total,
            payment_provider: row.payment_provider,
            payment_status: PaymentStatus::from(row.payment_status),
            status: parse_status(&row.status)?,
            courier_id: row.courier_id,
            created_at: row.created_at,
        })
    }
}

fn parse_status(value: &str) -> Result<FulfillmentStatus, sqlx::Error> {
    value
        .parse::<FulfillmentStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn parse_approval(value: &str) -> Result<CourierApproval, sqlx::Error> {
    value
        .parse::<CourierApproval>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

// -----------------------------------------------------------------------------
// STORE IMPLEMENTATION
// -----------------------------------------------------------------------------

#[async_trait]
impl Store for Database {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn list_orders(&self, filter: OrderFilter) -> StoreResult<Vec<Order>> {
        let condition = match filter {
            OrderFilter::All => "",
            OrderFilter::Available => "WHERE courier_id IS NULL AND payment_status <> 'refunded'",
        };
        let sql =
            format!("SELECT {ORDER_COLUMNS} FROM orders {condition} ORDER BY created_at ASC, id ASC");

        sqlx::query_as::<_, OrderRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn find_order(&self, user_id: i64, order_id: i64) -> StoreResult<Option<OrderDetail>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2");
        let Some(row) = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT product_id, size_id, quantity, unit_price
            FROM order_item
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(OrderDetail {
            order: Order::try_from(row)?,
            items,
        }))
    }

    async fn set_order_status(
        &self,
        order_id: i64,
        status: FulfillmentStatus,
    ) -> StoreResult<Option<OrderRecipient>> {
        // The locking read in `previous` waits for a concurrent writer and then
        // sees its committed status
        let row: Option<(String, String, String)> = sqlx::query_as(
            r#"
            WITH previous AS (
                SELECT id, user_id, status FROM orders WHERE id = $2 FOR UPDATE
            )
            UPDATE orders o
            SET status = $1
            FROM previous
            JOIN users u ON u.id = previous.user_id
            WHERE o.id = previous.id
            RETURNING previous.status, u.email, u.first_name
            "#,
        )
        .bind(status.as_str())
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(previous, email, first_name)| {
            Ok(OrderRecipient {
                status: parse_status(&previous)?,
                email,
                first_name,
            })
        })
        .transpose()
    }

    async fn assign_courier(&self, order_id: i64, courier_id: i64) -> StoreResult<AssignOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET courier_id = $1, status = $2
            WHERE id = $3
              AND (courier_id IS NULL OR courier_id = $1)
              AND payment_status <> $4
            "#,
        )
        .bind(courier_id)
        .bind(FulfillmentStatus::InTransit.as_str())
        .bind(order_id)
        .bind(PaymentStatus::Refunded.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(AssignOutcome::Assigned);
        }

        let row: Option<(String,)> = sqlx::query_as("SELECT payment_status FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row.map(|(status,)| PaymentStatus::from(status)) {
            None => AssignOutcome::NotFound,
            Some(PaymentStatus::Refunded) => AssignOutcome::Refunded,
            Some(_) => AssignOutcome::Taken,
        })
    }

    async fn courier_contact(&self, courier_id: i64) -> StoreResult<Option<CourierContact>> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT status, email, name FROM couriers WHERE id = $1")
                .bind(courier_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(status, email, name)| {
            Ok(CourierContact {
                status: parse_approval(&status)?,
                email,
                name,
            })
        })
        .transpose()
    }

    async fn set_courier_approval(
        &self,
        courier_id: i64,
        status: CourierApproval,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE couriers SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(courier_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn newsletter_subscribers(&self) -> StoreResult<Vec<Subscriber>> {
        sqlx::query_as::<_, Subscriber>(
            "SELECT email, first_name FROM users WHERE newsletter ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

// -----------------------------------------------------------------------------
// TRANSACTION
// -----------------------------------------------------------------------------

struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn insert_order(&mut self, user_id: i64, payment_provider: &str) -> StoreResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO orders (user_id, total, payment_provider, payment_status, status)
            VALUES ($1, 0, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(payment_provider)
        .bind(PaymentStatus::Pending.as_str())
        .bind(FulfillmentStatus::Placed.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn product_price(&mut self, product_id: i64) -> StoreResult<Option<Decimal>> {
        let row: Option<(Decimal,)> = sqlx::query_as("SELECT price FROM product WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(|(price,)| price))
    }

    async fn lock_stock(&mut self, product_id: i64, size_id: i64) -> StoreResult<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT quantity FROM product_sizes
            WHERE product_id = $1 AND size_id = $2
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(size_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(quantity,)| quantity))
    }

    async fn add_stock(&mut self, product_id: i64, size_id: i64, delta: i32) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_sizes (product_id, size_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id, size_id)
            DO UPDATE SET quantity = product_sizes.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(product_id)
        .bind(size_id)
        .bind(delta)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_line(&mut self, order_id: i64, line: &OrderLine) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_item (order_id, product_id, size_id, quantity, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order_id)
        .bind(line.product_id)
        .bind(line.size_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn set_order_total(&mut self, order_id: i64, total: Decimal) -> StoreResult<()> {
        sqlx::query("UPDATE orders SET total = $1 WHERE id = $2")
            .bind(total)
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn lock_payment_status(
        &mut self,
        order_id: i64,
        user_id: i64,
    ) -> StoreResult<Option<PaymentStatus>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payment_status FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(status,)| PaymentStatus::from(status)))
    }

    async fn order_lines(&mut self, order_id: i64) -> StoreResult<Vec<OrderLine>> {
        sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT product_id, size_id, quantity, unit_price
            FROM order_item
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
    }

    async fn mark_refunded(&mut self, order_id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE orders SET payment_status = $1, status = $2 WHERE id = $3")
            .bind(PaymentStatus::Refunded.as_str())
            .bind(FulfillmentStatus::Cancelled.as_str())
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await
    }
}
