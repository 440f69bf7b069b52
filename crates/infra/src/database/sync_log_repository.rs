//! SQLite `SyncLogRepository` (§4.1).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poller_core::SyncLogRepository;
use poller_domain::{NewSyncLog, Result, SyncLog};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};

use crate::errors::{map_join_error, map_r2d2_error, map_sqlite_error};

pub struct SqliteSyncLogRepository {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteSyncLogRepository {
    #[must_use]
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }
}

fn row_to_sync_log(row: &Row<'_>) -> rusqlite::Result<SyncLog> {
    Ok(SyncLog {
        id: row.get("id")?,
        connection_id: row.get("connection_id")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        found: row.get("found")?,
        sent: row.get("sent")?,
        failed: row.get("failed")?,
        skipped: row.get("skipped")?,
        error_message: row.get("error_message")?,
    })
}

#[async_trait]
impl SyncLogRepository for SqliteSyncLogRepository {
    async fn append(&self, log: NewSyncLog) -> Result<SyncLog> {
        let pool = Arc::clone(&self.pool);
        let id = tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = pool.get().map_err(|err| map_r2d2_error("append_sync_log", err))?;
            conn.execute(
                "INSERT INTO sync_logs (connection_id, started_at, finished_at, found, sent, \
                 failed, skipped, error_message) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    log.connection_id,
                    log.started_at.to_rfc3339(),
                    log.finished_at.to_rfc3339(),
                    log.found,
                    log.sent,
                    log.failed,
                    log.skipped,
                    log.error_message,
                ],
            )
            .map_err(|err| map_sqlite_error("append_sync_log", err))?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|err| map_join_error("append_sync_log", err))??;

        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<SyncLog> {
            let conn = pool.get().map_err(|err| map_r2d2_error("append_sync_log", err))?;
            conn.query_row("SELECT id, connection_id, started_at, finished_at, found, sent, failed, \
                 skipped, error_message FROM sync_logs WHERE id = ?1", params![id], row_to_sync_log)
                .map_err(|err| map_sqlite_error("append_sync_log", err))
        })
        .await
        .map_err(|err| map_join_error("append_sync_log", err))?
    }

    async fn list_recent(&self, connection_id: i64, limit: i64) -> Result<Vec<SyncLog>> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<Vec<SyncLog>> {
            let conn = pool.get().map_err(|err| map_r2d2_error("list_recent_sync_logs", err))?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, connection_id, started_at, finished_at, found, sent, failed, \
                     skipped, error_message FROM sync_logs WHERE connection_id = ?1 \
                     ORDER BY id DESC LIMIT ?2",
                )
                .map_err(|err| map_sqlite_error("list_recent_sync_logs", err))?;
            let rows = stmt
                .query_map(params![connection_id, limit], row_to_sync_log)
                .map_err(|err| map_sqlite_error("list_recent_sync_logs", err))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|err| map_sqlite_error("list_recent_sync_logs", err))?);
            }
            Ok(out)
        })
        .await
        .map_err(|err| map_join_error("list_recent_sync_logs", err))?
    }

    async fn trim_to_limit(&self, connection_id: i64, limit: i64) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get().map_err(|err| map_r2d2_error("trim_sync_logs", err))?;
            conn.execute(
                "DELETE FROM sync_logs WHERE connection_id = ?1 AND id NOT IN \
                 (SELECT id FROM sync_logs WHERE connection_id = ?1 ORDER BY id DESC LIMIT ?2)",
                params![connection_id, limit],
            )
            .map_err(|err| map_sqlite_error("trim_sync_logs", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("trim_sync_logs", err))?
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
    async fn append_then_trim_keeps_most_recent() {
        let repo = SqliteSyncLogRepository::new(test_pool());
        for i in 0..5 {
            repo.append(NewSyncLog {
                connection_id: 1,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                found: i,
                sent: 0,
                failed: 0,
                skipped: 0,
                error_message: None,
            })
            .await
            .expect("append ok");
        }

        repo.trim_to_limit(1, 2).await.expect("trim ok");
        let remaining = repo.list_recent(1, 10).await.expect("list ok");
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].found, 4);
        assert_eq!(remaining[1].found, 3);
    }
}
