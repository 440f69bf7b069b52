//! Bounded r2d2 connection pool over a plain (non-encrypted) SQLite file.
//!
//! Secrets are encrypted at the repository boundary via `FieldCipher`
//! instead of encrypting the file as a whole, so the pool itself is a plain
//! `r2d2_sqlite` pool (§4.1 "ambient: connection pooling").

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::errors::map_r2d2_error;
use poller_domain::Result;

const DEFAULT_MAX_SIZE: u32 = 8;

pub fn create_pool(db_path: impl AsRef<Path>, max_size: u32) -> Result<Arc<Pool<SqliteConnectionManager>>> {
    let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
    });

    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .build(manager)
        .map_err(|err| map_r2d2_error("create_pool", err))?;

    Ok(Arc::new(pool))
}

#[must_use]
pub fn default_max_size() -> u32 {
    DEFAULT_MAX_SIZE
}
