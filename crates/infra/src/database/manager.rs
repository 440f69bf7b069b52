//! Database connection manager: owns the pool and applies the schema.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use poller_domain::Result;

use super::pool::{create_pool, default_max_size};
use crate::errors::{map_r2d2_error, map_sqlite_error};

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SCHEMA_VERSION: i64 = 1;

pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Owns the connection pool and applies/verifies the schema on startup.
pub struct DbManager {
    pool: Arc<Pool<SqliteConnectionManager>>,
    path: PathBuf,
}

impl DbManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_pool_size(db_path, default_max_size())
    }

    pub fn with_pool_size(db_path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| poller_domain::PollerError::store("create_db_dir", err))?;
            }
        }

        let pool = create_pool(&path, pool_size)?;
        info!(db_path = %path.display(), pool_size, "sqlite pool initialised");

        Ok(Self { pool, path })
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<Pool<SqliteConnectionManager>> {
        &self.pool
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_connection(&self) -> Result<DbConnection> {
        self.pool.get().map_err(|err| map_r2d2_error("get_connection", err))
    }

    /// Ensures the schema exists, idempotently.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL).map_err(|err| map_sqlite_error("run_migrations", err))?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, CAST(strftime('%s','now') AS INTEGER))",
            [SCHEMA_VERSION],
        )
        .map_err(|err| map_sqlite_error("run_migrations", err))?;
        Ok(())
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|err| map_sqlite_error("health_check", err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn migrations_create_schema_version() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("test.db");

        let manager = DbManager::new(&db_path).expect("manager created");
        manager.run_migrations().expect("migrations run");

        let conn = manager.get_connection().expect("connection acquired");
        let version: i64 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .expect("version row present");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn health_check_succeeds_for_valid_database() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("test.db");

        let manager = DbManager::new(&db_path).expect("manager created");
        manager.run_migrations().expect("migrations run");

        manager.health_check().expect("health check passed");
    }
}
