//! Dead Letter Queue (DLQ) for messages a consumer rejected with
//! Reject-no-requeue. Provides persistent storage and management of
//! failed deliveries for observability, incident response, and manual
//! reprocessing.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use order_saga_core::event::SerializedEvent;
use sqlx::{PgPool, Row};

/// Status of an entry in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqStatus {
    /// Pending investigation/reprocessing.
    Pending,
    /// Currently being investigated.
    Processing,
    /// Successfully reprocessed.
    Resolved,
    /// Permanently discarded (cannot be fixed).
    Discarded,
}

impl DlqStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from a database string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            other => Err(StoreError::Database(sqlx::Error::Decode(
                format!("invalid dlq status: {other}").into(),
            ))),
        }
    }
}

/// An entry in the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// Unique identifier for this DLQ entry.
    pub id: i64,
    /// The consumer queue the message was rejected from.
    pub queue_name: String,
    /// The message that failed.
    pub event: SerializedEvent,
    /// Human-readable error message.
    pub error_message: String,
    /// How many times processing was retried before giving up.
    pub retry_count: i32,
    /// When this entry was first recorded.
    pub first_failed_at: DateTime<Utc>,
    /// Current processing status.
    pub status: DlqStatus,
}

/// Postgres-backed Dead Letter Queue.
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Build a DLQ over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a rejected delivery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn add_entry(
        &self,
        queue_name: &str,
        event: &SerializedEvent,
        error_message: &str,
        retry_count: i32,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO failed_events (
                queue_name, event_type, event_data, metadata, error_message, retry_count
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(queue_name)
        .bind(&event.event_type)
        .bind(&event.data)
        .bind(&event.metadata)
        .bind(error_message)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");

        tracing::warn!(
            dlq_id = id,
            queue_name,
            event_type = %event.event_type,
            error = error_message,
            retry_count,
            "message routed to dead-letter queue"
        );

        Ok(id)
    }

    /// List pending failures, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<FailedEvent>, StoreError> {
        self.list_by_status(DlqStatus::Pending, limit).await
    }

    /// List failures by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_by_status(&self, status: DlqStatus, limit: i64) -> Result<Vec<FailedEvent>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, queue_name, event_type, event_data, metadata,
                   error_message, retry_count, first_failed_at, status
            FROM failed_events
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_failed_event).collect()
    }

    /// Mark an entry resolved after manual reprocessing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn mark_resolved(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE failed_events SET status = 'resolved' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(dlq_id = id, "dlq entry marked resolved");
        Ok(())
    }

    /// Mark an entry as permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn mark_discarded(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE failed_events SET status = 'discarded' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::warn!(dlq_id = id, "dlq entry marked discarded");
        Ok(())
    }

    /// Count pending failures, for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM failed_events WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    fn row_to_failed_event(row: &sqlx::postgres::PgRow) -> Result<FailedEvent, StoreError> {
        let status_str: String = row.get("status");
        Ok(FailedEvent {
            id: row.get("id"),
            queue_name: row.get("queue_name"),
            event: SerializedEvent {
                event_type: row.get("event_type"),
                data: row.get("event_data"),
                metadata: row.get("metadata"),
            },
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            first_failed_at: row.get("first_failed_at"),
            status: DlqStatus::parse(&status_str)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in [DlqStatus::Pending, DlqStatus::Processing, DlqStatus::Resolved, DlqStatus::Discarded] {
            let parsed = DlqStatus::parse(status.as_str()).unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(DlqStatus::parse("nonsense").is_err());
    }
}
