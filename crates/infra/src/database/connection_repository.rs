//! SQLite `ConnectionRepository` (§4.1). Secret fields pass through a
//! [`FieldCipher`] at this boundary: ciphertext on disk, plaintext once
//! loaded into a `Connection`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use poller_common::FieldCipher;
use poller_core::ConnectionRepository;
use poller_domain::{CircuitState, Connection, ConnectionUpdate, NewConnection, PollerError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};

use crate::errors::{map_join_error, map_sqlite_error};

pub struct SqliteConnectionRepository {
    pool: Arc<Pool<SqliteConnectionManager>>,
    cipher: Arc<FieldCipher>,
}

impl SqliteConnectionRepository {
    #[must_use]
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>, cipher: Arc<FieldCipher>) -> Self {
        Self { pool, cipher }
    }

    fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        self.cipher.encrypt(plaintext).map_err(|err| PollerError::store("encrypt_field", err))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        self.cipher.decrypt(ciphertext).map_err(|err| PollerError::store("decrypt_field", err))
    }

    fn decrypt_connection(&self, raw: RawConnection) -> Result<Connection> {
        let circuit_state: CircuitState = raw
            .circuit_state
            .parse()
            .map_err(|reason: String| PollerError::config("circuit_state", reason))?;

        Ok(Connection {
            id: raw.id,
            name: raw.name,
            odoo_url: raw.odoo_url,
            odoo_db: raw.odoo_db,
            odoo_username: raw.odoo_username,
            odoo_api_key: self.decrypt(&raw.odoo_api_key)?,
            webhook_url: raw.webhook_url,
            webhook_secret: self.decrypt(&raw.webhook_secret)?,
            poll_interval_seconds: raw.poll_interval_seconds,
            enabled: raw.enabled,
            circuit_state,
            circuit_failure_count: raw.circuit_failure_count,
            circuit_last_failure_at: raw.circuit_last_failure_at,
            last_sync_at: raw.last_sync_at,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        })
    }
}

struct RawConnection {
    id: i64,
    name: String,
    odoo_url: String,
    odoo_db: String,
    odoo_username: String,
    odoo_api_key: String,
    webhook_url: String,
    webhook_secret: String,
    poll_interval_seconds: i64,
    enabled: bool,
    circuit_state: String,
    circuit_failure_count: i64,
    circuit_last_failure_at: Option<chrono::DateTime<Utc>>,
    last_sync_at: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "id, name, odoo_url, odoo_db, odoo_username, odoo_api_key, webhook_url, \
     webhook_secret, poll_interval_seconds, enabled, circuit_state, circuit_failure_count, \
     circuit_last_failure_at, last_sync_at, created_at, updated_at";

#[async_trait]
impl ConnectionRepository for SqliteConnectionRepository {
    async fn list(&self, enabled_only: bool) -> Result<Vec<Connection>> {
        let pool = Arc::clone(&self.pool);
        let raws = tokio::task::spawn_blocking(move || -> Result<Vec<RawConnection>> {
            let conn = pool.get().map_err(|err| crate::errors::map_r2d2_error("list_connections", err))?;
            let sql = if enabled_only {
                format!("SELECT {SELECT_COLUMNS} FROM connections WHERE enabled = 1 ORDER BY name")
            } else {
                format!("SELECT {SELECT_COLUMNS} FROM connections ORDER BY name")
            };
            let mut stmt = conn.prepare(&sql).map_err(|err| map_sqlite_error("list_connections", err))?;
            let rows = stmt
                .query_map([], |row| row_to_raw(row))
                .map_err(|err| map_sqlite_error("list_connections", err))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|err| map_sqlite_error("list_connections", err))?);
            }
            Ok(out)
        })
        .await
        .map_err(|err| map_join_error("list_connections", err))??;

        raws.into_iter().map(|raw| self.decrypt_connection(raw)).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Connection>> {
        let pool = Arc::clone(&self.pool);
        let raw = tokio::task::spawn_blocking(move || -> Result<Option<RawConnection>> {
            let conn = pool.get().map_err(|err| crate::errors::map_r2d2_error("get_connection", err))?;
            conn.query_row(&format!("SELECT {SELECT_COLUMNS} FROM connections WHERE id = ?1"), params![id], |row| {
                row_to_raw(row)
            })
            .optional()
            .map_err(|err| map_sqlite_error("get_connection", err))
        })
        .await
        .map_err(|err| map_join_error("get_connection", err))??;

        raw.map(|raw| self.decrypt_connection(raw)).transpose()
    }

    async fn create(&self, new: NewConnection) -> Result<Connection> {
        new.validate().map_err(|reason| PollerError::config("new_connection", reason))?;

        let encrypted_api_key = self.encrypt(&new.odoo_api_key)?;
        let encrypted_secret = self.encrypt(&new.webhook_secret)?;
        let now = Utc::now();

        let pool = Arc::clone(&self.pool);
        let id = tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = pool.get().map_err(|err| crate::errors::map_r2d2_error("create_connection", err))?;
            conn.execute(
                "INSERT INTO connections (name, odoo_url, odoo_db, odoo_username, odoo_api_key, \
                 webhook_url, webhook_secret, poll_interval_seconds, enabled, circuit_state, \
                 circuit_failure_count, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 'closed', 0, ?9, ?9)",
                params![
                    new.name,
                    new.odoo_url,
                    new.odoo_db,
                    new.odoo_username,
                    encrypted_api_key,
                    new.webhook_url,
                    encrypted_secret,
                    new.poll_interval_seconds,
                    now.to_rfc3339(),
                ],
            )
            .map_err(|err| map_sqlite_error("create_connection", err))?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|err| map_join_error("create_connection", err))??;

        self.get(id).await?.ok_or_else(|| {
            PollerError::store("create_connection", std::io::Error::other("row vanished after insert"))
        })
    }

    async fn update(&self, id: i64, update: ConnectionUpdate) -> Result<Connection> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| PollerError::store("update_connection", std::io::Error::other("connection not found")))?;

        let name = update.name.unwrap_or(existing.name);
        let odoo_url = update.odoo_url.unwrap_or(existing.odoo_url);
        let odoo_db = update.odoo_db.unwrap_or(existing.odoo_db);
        let odoo_username = update.odoo_username.unwrap_or(existing.odoo_username);
        let odoo_api_key = match update.odoo_api_key {
            Some(key) => self.encrypt(&key)?,
            None => self.encrypt(&existing.odoo_api_key)?,
        };
        let webhook_url = update.webhook_url.unwrap_or(existing.webhook_url);
        let webhook_secret = match update.webhook_secret {
            Some(secret) => self.encrypt(&secret)?,
            None => self.encrypt(&existing.webhook_secret)?,
        };
        let poll_interval_seconds = update.poll_interval_seconds.unwrap_or(existing.poll_interval_seconds);
        let enabled = update.enabled.unwrap_or(existing.enabled);
        let now = Utc::now();

        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get().map_err(|err| crate::errors::map_r2d2_error("update_connection", err))?;
            conn.execute(
                "UPDATE connections SET name = ?1, odoo_url = ?2, odoo_db = ?3, odoo_username = ?4, \
                 odoo_api_key = ?5, webhook_url = ?6, webhook_secret = ?7, poll_interval_seconds = ?8, \
                 enabled = ?9, updated_at = ?10 WHERE id = ?11",
                params![
                    name,
                    odoo_url,
                    odoo_db,
                    odoo_username,
                    odoo_api_key,
                    webhook_url,
                    webhook_secret,
                    poll_interval_seconds,
                    enabled,
                    now.to_rfc3339(),
                    id,
                ],
            )
            .map_err(|err| map_sqlite_error("update_connection", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("update_connection", err))??;

        self.get(id).await?.ok_or_else(|| {
            PollerError::store("update_connection", std::io::Error::other("row vanished after update"))
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get().map_err(|err| crate::errors::map_r2d2_error("delete_connection", err))?;
            conn.execute("DELETE FROM connections WHERE id = ?1", params![id])
                .map_err(|err| map_sqlite_error("delete_connection", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("delete_connection", err))?
    }

    async fn update_circuit_state(&self, id: i64, state: CircuitState, failure_count: i64) -> Result<()> {
        let state_str = state.to_string();
        let now = Utc::now();
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn =
                pool.get().map_err(|err| crate::errors::map_r2d2_error("update_circuit_state", err))?;
            if state_str == "open" {
                conn.execute(
                    "UPDATE connections SET circuit_state = ?1, circuit_failure_count = ?2, \
                     circuit_last_failure_at = ?3, updated_at = ?4 WHERE id = ?5",
                    params![state_str, failure_count, now.to_rfc3339(), now.to_rfc3339(), id],
                )
            } else {
                conn.execute(
                    "UPDATE connections SET circuit_state = ?1, circuit_failure_count = ?2, \
                     updated_at = ?3 WHERE id = ?4",
                    params![state_str, failure_count, now.to_rfc3339(), id],
                )
            }
            .map_err(|err| map_sqlite_error("update_circuit_state", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("update_circuit_state", err))?
    }

    async fn update_last_sync_at(&self, id: i64, last_sync_at: &str) -> Result<()> {
        let last_sync_at = last_sync_at.to_string();
        let now = Utc::now();
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn =
                pool.get().map_err(|err| crate::errors::map_r2d2_error("update_last_sync_at", err))?;
            conn.execute(
                "UPDATE connections SET last_sync_at = ?1, updated_at = ?2 WHERE id = ?3",
                params![last_sync_at, now.to_rfc3339(), id],
            )
            .map_err(|err| map_sqlite_error("update_last_sync_at", err))?;
            Ok(())
        })
        .await
        .map_err(|err| map_join_error("update_last_sync_at", err))?
    }
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawConnection> {
    Ok(RawConnection {
        id: row.get("id")?,
        name: row.get("name")?,
        odoo_url: row.get("odoo_url")?,
        odoo_db: row.get("odoo_db")?,
        odoo_username: row.get("odoo_username")?,
        odoo_api_key: row.get("odoo_api_key")?,
        webhook_url: row.get("webhook_url")?,
        webhook_secret: row.get("webhook_secret")?,
        poll_interval_seconds: row.get("poll_interval_seconds")?,
        enabled: row.get("enabled")?,
        circuit_state: row.get("circuit_state")?,
        circuit_failure_count: row.get("circuit_failure_count")?,
        circuit_last_failure_at: row.get("circuit_last_failure_at")?,
        last_sync_at: row.get("last_sync_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::pool::create_pool;

    fn test_repo() -> SqliteConnectionRepository {
        let pool = create_pool(":memory:", 1).expect("pool");
        {
            let conn = pool.get().expect("conn");
            conn.execute_batch(include_str!("schema.sql")).expect("schema");
        }
        let cipher = FieldCipher::new([7u8; 32]);
        SqliteConnectionRepository::new(pool, Arc::new(cipher))
    }

    #[tokio::test]
    async fn create_then_get_roundtrips_secrets() {
        let repo = test_repo();
        let created = repo
            .create(NewConnection {
                name: "Acme".into(),
                odoo_url: "https://acme.example".into(),
                odoo_db: "acme".into(),
                odoo_username: "admin".into(),
                odoo_api_key: "super-secret-key".into(),
                webhook_url: "https://hooks.example/acme".into(),
                webhook_secret: "whsec".into(),
                poll_interval_seconds: 30,
            })
            .await
            .expect("created");

        let fetched = repo.get(created.id).await.expect("get ok").expect("present");
        assert_eq!(fetched.odoo_api_key, "super-secret-key");
        assert_eq!(fetched.webhook_secret, "whsec");
        assert_eq!(fetched.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn update_circuit_state_stamps_failure_time_only_when_open() {
        let repo = test_repo();
        let created = repo
            .create(NewConnection {
                name: "Acme".into(),
                odoo_url: "https://acme.example".into(),
                odoo_db: "acme".into(),
                odoo_username: "admin".into(),
                odoo_api_key: "k".into(),
                webhook_url: "https://hooks.example/acme".into(),
                webhook_secret: String::new(),
                poll_interval_seconds: 30,
            })
            .await
            .expect("created");

        repo.update_circuit_state(created.id, CircuitState::Open, 5).await.expect("update ok");
        let fetched = repo.get(created.id).await.expect("get ok").expect("present");
        assert_eq!(fetched.circuit_state, CircuitState::Open);
        assert!(fetched.circuit_last_failure_at.is_some());
    }
}
