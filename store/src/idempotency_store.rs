//! Idempotency key → resource id mapping, backed by a unique index so
//! the database itself is the synchronization primitive: no in-process
//! lock is needed.

use crate::error::StoreError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Postgres-backed idempotency store.
pub struct IdempotencyStore {
    pool: PgPool,
}

impl IdempotencyStore {
    /// Build a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to claim `key` for `candidate_resource_id`. On first use the
    /// candidate is stored and returned; on a unique-key conflict, the
    /// previously stored id is read back and returned instead. The
    /// first caller for a given key always wins, permanently.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert/select fails.
    pub async fn try_insert(&self, key: &str, candidate_resource_id: Uuid) -> Result<Uuid, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO idempotency (key, resource_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO NOTHING
            RETURNING resource_id
            ",
        )
        .bind(key)
        .bind(candidate_resource_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            tracing::debug!(key, "idempotency key claimed by this caller");
            return Ok(row.get("resource_id"));
        }

        let existing = sqlx::query("SELECT resource_id FROM idempotency WHERE key = $1")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

        tracing::debug!(key, "idempotency key already claimed; returning existing resource");
        Ok(existing.get("resource_id"))
    }
}
