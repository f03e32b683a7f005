//! Durable persistence for the `Order` aggregate, with optimistic
//! locking on `row_version`.
//!
//! Money columns store minor units (cents) directly as `BIGINT` rather
//! than `NUMERIC` + floating point round-tripping: both operands of
//! every line-total computation are already integral minor units, so
//! there is nothing for a decimal column to buy us and a float
//! conversion would only introduce rounding risk.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use order_saga_core::money::Money;
use order_saga_core::order::{Order, OrderItem, OrderStatus};
use sqlx::{PgPool, Row};
use uuid::Uuid;

fn status_to_int(status: OrderStatus) -> i32 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Confirmed => 1,
        OrderStatus::Cancelled => 2,
        OrderStatus::Shipped => 3,
        OrderStatus::Delivered => 4,
    }
}

fn status_from_int(value: i32) -> OrderStatus {
    match value {
        1 => OrderStatus::Confirmed,
        2 => OrderStatus::Cancelled,
        3 => OrderStatus::Shipped,
        4 => OrderStatus::Delivered,
        _ => OrderStatus::Pending,
    }
}

/// Postgres-backed store for orders and their line items.
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    /// Build a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a brand-new order and its items in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn create(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO orders (
                id, customer_id, status, created_at, confirmed_at, cancelled_at,
                shipped_at, delivered_at, cancel_reason, total_amount_minor, currency, row_version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(order.id)
        .bind(&order.customer_id)
        .bind(status_to_int(order.status))
        .bind(order.created_at)
        .bind(order.confirmed_at)
        .bind(order.cancelled_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .bind(&order.cancel_reason)
        .bind(order.total_amount.minor_units())
        .bind(order.total_amount.currency())
        .bind(order.row_version)
        .execute(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r"
                INSERT INTO order_items (id, order_id, product_id, quantity, unit_price_minor, currency)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(&item.product_id)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.minor_units())
            .bind(item.unit_price.currency())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(order_id = %order.id, "order persisted");

        Ok(())
    }

    /// Load an order and its items by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such order exists, or
    /// [`StoreError::Database`] on a query failure.
    pub async fn get(&self, id: Uuid) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, customer_id, status, created_at, confirmed_at, cancelled_at,
                   shipped_at, delivered_at, cancel_reason, total_amount_minor, currency, row_version
            FROM orders WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let item_rows = sqlx::query(
            r"
            SELECT id, order_id, product_id, quantity, unit_price_minor, currency
            FROM order_items WHERE order_id = $1 ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let items = item_rows
            .iter()
            .map(|r| {
                let currency: String = r.get("currency");
                OrderItem {
                    id: r.get("id"),
                    order_id: r.get("order_id"),
                    product_id: r.get("product_id"),
                    quantity: r.get::<i64, _>("quantity") as u32,
                    unit_price: Money::from_minor_units(r.get("unit_price_minor"), &currency),
                }
            })
            .collect();

        let currency: String = row.get("currency");

        Ok(Order {
            id: row.get("id"),
            customer_id: row.get("customer_id"),
            status: status_from_int(row.get("status")),
            created_at: row.get("created_at"),
            confirmed_at: row.get::<Option<DateTime<Utc>>, _>("confirmed_at"),
            cancelled_at: row.get::<Option<DateTime<Utc>>, _>("cancelled_at"),
            shipped_at: row.get::<Option<DateTime<Utc>>, _>("shipped_at"),
            delivered_at: row.get::<Option<DateTime<Utc>>, _>("delivered_at"),
            cancel_reason: row.get("cancel_reason"),
            total_amount: Money::from_minor_units(row.get("total_amount_minor"), &currency),
            row_version: row.get("row_version"),
            items,
        })
    }

    /// Persist a mutation of an already-existing order, enforcing
    /// optimistic concurrency: the update only applies if the stored
    /// `row_version` still matches `order.row_version`, and then bumps
    /// it by one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OptimisticConflict`] if another writer
    /// updated the row first, or [`StoreError::Database`] on a query
    /// failure.
    pub async fn update(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = $1, confirmed_at = $2, cancelled_at = $3, shipped_at = $4,
                delivered_at = $5, cancel_reason = $6, row_version = row_version + 1
            WHERE id = $7 AND row_version = $8
            ",
        )
        .bind(status_to_int(order.status))
        .bind(order.confirmed_at)
        .bind(order.cancelled_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .bind(&order.cancel_reason)
        .bind(order.id)
        .bind(order.row_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OptimisticConflict { order_id: order.id });
        }

        Ok(())
    }
}
