//! SQLite `SentOrderRepository`: the idempotency ledger (§3, §4.1).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use poller_core::SentOrderRepository;
use poller_domain::{Result, SentOrder};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};

use crate::errors::{map_join_error, map_r2d2_error, map_sqlite_error};

pub struct SqliteSentOrderRepository {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteSentOrderRepository {
    #[must_use]
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }
}

fn row_to_sent_order(row: &Row<'_>) -> rusqlite::Result<SentOrder> {
    Ok(SentOrder {
        id: row.get("id")?,
        connection_id: row.get("connection_id")?,
        order_id: row.get("order_id")?,
        write_date: row.get("write_date")?,
        sent_at: row.get("sent_at")?,
    })
}

#[async_trait]
impl SentOrderRepository for SqliteSentOrderRepository {
    async fn mark_sent(&self, connection_id: i64, order_id: i64, write_date: &str) -> Result<()> {
        let write_date = write_date.to_string();
        let now = Utc::now();
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get().map_err(|err| map_r2d2_error("mark_sent", err))?;
            conn.execute(
                "INSERT OR IGNORE INTO sent_orders (connection_id, order_id, write_date, sent_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![connection_id, order_id, write_date, now.to_rfc3339()],
            )
            .map_err(|err| map_sqlite_error("mark_sent", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("mark_sent", err))?
    }

    async fn is_sent(&self, connection_id: i64, order_id: i64, write_date: &str) -> Result<bool> {
        let write_date = write_date.to_string();
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = pool.get().map_err(|err| map_r2d2_error("is_sent", err))?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sent_orders WHERE connection_id = ?1 AND order_id = ?2 \
                     AND write_date = ?3",
                    params![connection_id, order_id, write_date],
                    |row| row.get(0),
                )
                .map_err(|err| map_sqlite_error("is_sent", err))?;
            Ok(count > 0)
        })
        .await
        .map_err(|err| map_join_error("is_sent", err))?
    }

    async fn get_sent_ids(&self, connection_id: i64) -> Result<HashSet<(i64, String)>> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<HashSet<(i64, String)>> {
            let conn = pool.get().map_err(|err| map_r2d2_error("get_sent_ids", err))?;
            let mut stmt = conn
                .prepare("SELECT order_id, write_date FROM sent_orders WHERE connection_id = ?1")
                .map_err(|err| map_sqlite_error("get_sent_ids", err))?;
            let rows = stmt
                .query_map(params![connection_id], |row| {
                    let order_id: i64 = row.get(0)?;
                    let write_date: String = row.get(1)?;
                    Ok((order_id, write_date))
                })
                .map_err(|err| map_sqlite_error("get_sent_ids", err))?;
            let mut out = HashSet::new();
            for row in rows {
                out.insert(row.map_err(|err| map_sqlite_error("get_sent_ids", err))?);
            }
            Ok(out)
        })
        .await
        .map_err(|err| map_join_error("get_sent_ids", err))?
    }

    async fn list_recent(&self, connection_id: i64, limit: i64) -> Result<Vec<SentOrder>> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<Vec<SentOrder>> {
            let conn = pool.get().map_err(|err| map_r2d2_error("list_recent_sent_orders", err))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, connection_id, order_id, write_date, sent_at FROM sent_orders \
                     WHERE connection_id = ?1 ORDER BY sent_at DESC LIMIT ?2",
                )
                .map_err(|err| map_sqlite_error("list_recent_sent_orders", err))?;
            let rows = stmt
                .query_map(params![connection_id, limit], row_to_sent_order)
                .map_err(|err| map_sqlite_error("list_recent_sent_orders", err))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|err| map_sqlite_error("list_recent_sent_orders", err))?);
            }
            Ok(out)
        })
        .await
        .map_err(|err| map_join_error("list_recent_sent_orders", err))?
    }

    async fn trim_to_limit(&self, connection_id: i64, limit: i64) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get().map_err(|err| map_r2d2_error("trim_sent_orders", err))?;
            conn.execute(
                "DELETE FROM sent_orders WHERE connection_id = ?1 AND id NOT IN \
                 (SELECT id FROM sent_orders WHERE connection_id = ?1 ORDER BY sent_at DESC LIMIT ?2)",
                params![connection_id, limit],
            )
            .map_err(|err| map_sqlite_error("trim_sent_orders", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("trim_sent_orders", err))?
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
    async fn mark_sent_is_idempotent_on_natural_key() {
        let repo = SqliteSentOrderRepository::new(test_pool());
        repo.mark_sent(1, 42, "2024-01-01 00:00:00").await.expect("first mark ok");
        repo.mark_sent(1, 42, "2024-01-01 00:00:00").await.expect("second mark ok");

        let ids = repo.get_sent_ids(1).await.expect("get sent ids ok");
        assert_eq!(ids.len(), 1);
        assert!(repo.is_sent(1, 42, "2024-01-01 00:00:00").await.expect("is sent ok"));
    }

    #[tokio::test]
    async fn reappearance_after_edit_is_a_new_key() {
        let repo = SqliteSentOrderRepository::new(test_pool());
        repo.mark_sent(1, 42, "2024-01-01 00:00:00").await.expect("mark ok");
        repo.mark_sent(1, 42, "2024-02-01 00:00:00").await.expect("mark ok");

        let ids = repo.get_sent_ids(1).await.expect("get sent ids ok");
        assert_eq!(ids.len(), 2);
    }
}
