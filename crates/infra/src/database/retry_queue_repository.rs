//! SQLite `RetryQueueRepository` (§4.1).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poller_core::RetryQueueRepository;
use poller_domain::{
    NewRetryItem, PollerError, Result, RetryItem, RetryQueueSummary, RetryStatus, RetryStatusUpdate,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};

use crate::errors::{map_join_error, map_r2d2_error, map_sqlite_error};

pub struct SqliteRetryQueueRepository {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteRetryQueueRepository {
    #[must_use]
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str =
    "id, connection_id, order_id, order_name, payload, status, attempts, max_attempts, \
     next_retry_at, last_error, created_at";

fn row_to_retry_item(row: &Row<'_>) -> rusqlite::Result<RetryItem> {
    let payload_text: String = row.get("payload")?;
    let status_text: String = row.get("status")?;
    let payload = serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null);
    let status: RetryStatus = status_text.parse().unwrap_or(RetryStatus::Pending);

    Ok(RetryItem {
        id: row.get("id")?,
        connection_id: row.get("connection_id")?,
        order_id: row.get("order_id")?,
        order_name: row.get("order_name")?,
        payload,
        status,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        next_retry_at: row.get("next_retry_at")?,
        last_error: row.get("last_error")?,
        created_at: row.get("created_at")?,
    })
}

#[async_trait]
impl RetryQueueRepository for SqliteRetryQueueRepository {
    async fn enqueue(&self, item: NewRetryItem) -> Result<RetryItem> {
        let payload_text = serde_json::to_string(&item.payload)
            .map_err(|err| crate::errors::map_serde_error("enqueue_retry_item", err))?;
        let now = Utc::now();

        let pool = Arc::clone(&self.pool);
        let id = tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = pool.get().map_err(|err| map_r2d2_error("enqueue_retry_item", err))?;
            conn.execute(
                "INSERT INTO retry_queue (connection_id, order_id, order_name, payload, status, \
                 attempts, max_attempts, next_retry_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7)",
                params![
                    item.connection_id,
                    item.order_id,
                    item.order_name,
                    payload_text,
                    item.max_attempts,
                    item.next_retry_at.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|err| map_sqlite_error("enqueue_retry_item", err))?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|err| map_join_error("enqueue_retry_item", err))??;

        self.get(id).await?.ok_or_else(|| {
            PollerError::store("enqueue_retry_item", std::io::Error::other("row vanished after insert"))
        })
    }

    async fn get(&self, id: i64) -> Result<Option<RetryItem>> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<Option<RetryItem>> {
            let conn = pool.get().map_err(|err| map_r2d2_error("get_retry_item", err))?;
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM retry_queue WHERE id = ?1"),
                params![id],
                row_to_retry_item,
            )
            .optional()
            .map_err(|err| map_sqlite_error("get_retry_item", err))
        })
        .await
        .map_err(|err| map_join_error("get_retry_item", err))?
    }

    async fn get_pending(&self, connection_id: i64, now: DateTime<Utc>) -> Result<Vec<RetryItem>> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<Vec<RetryItem>> {
            let conn = pool.get().map_err(|err| map_r2d2_error("get_pending_retry_items", err))?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM retry_queue WHERE connection_id = ?1 AND \
                     status = 'pending' AND next_retry_at <= ?2 ORDER BY next_retry_at ASC"
                ))
                .map_err(|err| map_sqlite_error("get_pending_retry_items", err))?;
            let rows = stmt
                .query_map(params![connection_id, now.to_rfc3339()], row_to_retry_item)
                .map_err(|err| map_sqlite_error("get_pending_retry_items", err))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|err| map_sqlite_error("get_pending_retry_items", err))?);
            }
            Ok(out)
        })
        .await
        .map_err(|err| map_join_error("get_pending_retry_items", err))?
    }

    async fn update_status(&self, id: i64, update: RetryStatusUpdate) -> Result<()> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| PollerError::store("update_retry_status", std::io::Error::other("retry item not found")))?;

        let status = update.status.unwrap_or(existing.status).to_string();
        let attempts = update.attempts.unwrap_or(existing.attempts);
        let next_retry_at = update.next_retry_at.unwrap_or(existing.next_retry_at);
        let last_error = update.last_error.or(existing.last_error);

        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get().map_err(|err| map_r2d2_error("update_retry_status", err))?;
            conn.execute(
                "UPDATE retry_queue SET status = ?1, attempts = ?2, next_retry_at = ?3, \
                 last_error = ?4 WHERE id = ?5",
                params![status, attempts, next_retry_at.to_rfc3339(), last_error, id],
            )
            .map_err(|err| map_sqlite_error("update_retry_status", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("update_retry_status", err))?
    }

    async fn list_by_connection(&self, connection_id: i64) -> Result<Vec<RetryItem>> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<Vec<RetryItem>> {
            let conn = pool.get().map_err(|err| map_r2d2_error("list_retry_items", err))?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM retry_queue WHERE connection_id = ?1 ORDER BY id DESC"
                ))
                .map_err(|err| map_sqlite_error("list_retry_items", err))?;
            let rows = stmt
                .query_map(params![connection_id], row_to_retry_item)
                .map_err(|err| map_sqlite_error("list_retry_items", err))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|err| map_sqlite_error("list_retry_items", err))?);
            }
            Ok(out)
        })
        .await
        .map_err(|err| map_join_error("list_retry_items", err))?
    }

    async fn cleanup_finished(&self, connection_id: i64) -> Result<u64> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let conn = pool.get().map_err(|err| map_r2d2_error("cleanup_finished_retries", err))?;
            let deleted = conn
                .execute(
                    "DELETE FROM retry_queue WHERE connection_id = ?1 AND status IN ('sent', 'discarded')",
                    params![connection_id],
                )
                .map_err(|err| map_sqlite_error("cleanup_finished_retries", err))?;
            Ok(deleted as u64)
        })
        .await
        .map_err(|err| map_join_error("cleanup_finished_retries", err))?
    }

    async fn summary(&self, connection_id: i64) -> Result<RetryQueueSummary> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<RetryQueueSummary> {
            let conn = pool.get().map_err(|err| map_r2d2_error("retry_queue_summary", err))?;
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM retry_queue WHERE connection_id = ?1 GROUP BY status")
                .map_err(|err| map_sqlite_error("retry_queue_summary", err))?;
            let rows = stmt
                .query_map(params![connection_id], |row| {
                    let status: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((status, count))
                })
                .map_err(|err| map_sqlite_error("retry_queue_summary", err))?;

            let mut summary = RetryQueueSummary::default();
            for row in rows {
                let (status, count) = row.map_err(|err| map_sqlite_error("retry_queue_summary", err))?;
                match status.as_str() {
                    "pending" => summary.pending = count,
                    "sent" => summary.sent = count,
                    "discarded" => summary.discarded = count,
                    _ => {}
                }
            }
            Ok(summary)
        })
        .await
        .map_err(|err| map_join_error("retry_queue_summary", err))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::pool::create_pool;

    fn test_pool() -> Arc<Pool<SqliteConnectionManager>> {
        let pool = create_pool(":memory:", 1).expect("pool");
        let conn = pool.get().expect("conn");
        conn.execute_batch(include_str!("schema.sql")).expect("schema");
        conn.execute(
            "INSERT INTO connections (id, name, odoo_url, odoo_db, odoo_username, odoo_api_key, \
             webhook_url, webhook_secret, poll_interval_seconds, created_at, updated_at) \
             VALUES (1, 'x', 'u', 'd', 'u', 'k', 'w', '', 30, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .expect("seed connection");
        drop(conn);
        pool
    }

    #[tokio::test]
    async fn get_pending_only_returns_due_items() {
        let repo = SqliteRetryQueueRepository::new(test_pool());
        let now = Utc::now();

        repo.enqueue(NewRetryItem {
            connection_id: 1,
            order_id: 100,
            order_name: "SO100".into(),
            payload: serde_json::json!({"order_id": 100}),
            next_retry_at: now - chrono::Duration::seconds(10),
            max_attempts: 5,
        })
        .await
        .expect("enqueue ok");

        repo.enqueue(NewRetryItem {
            connection_id: 1,
            order_id: 200,
            order_name: "SO200".into(),
            payload: serde_json::json!({"order_id": 200}),
            next_retry_at: now + chrono::Duration::seconds(600),
            max_attempts: 5,
        })
        .await
        .expect("enqueue ok");

        let pending = repo.get_pending(1, now).await.expect("get pending ok");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order_id, 100);
    }

    #[tokio::test]
    async fn cleanup_finished_removes_terminal_rows_only() {
        let repo = SqliteRetryQueueRepository::new(test_pool());
        let item = repo
            .enqueue(NewRetryItem {
                connection_id: 1,
                order_id: 1,
                order_name: "SO1".into(),
                payload: serde_json::json!({}),
                next_retry_at: Utc::now(),
                max_attempts: 5,
            })
            .await
            .expect("enqueue ok");

        repo.update_status(
            item.id,
            RetryStatusUpdate { status: Some(RetryStatus::Discarded), ..Default::default() },
        )
        .await
        .expect("update ok");

        let deleted = repo.cleanup_finished(1).await.expect("cleanup ok");
        assert_eq!(deleted, 1);
        assert!(repo.get(item.id).await.expect("get ok").is_none());
    }
}
