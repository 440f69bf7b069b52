//! `Connection`: a tenant binding (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-state circuit breaker state, persisted denormalized on the
/// connection row so workers can rehydrate it on startup (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("unknown circuit state: {other}")),
        }
    }
}

/// A configured tenant binding: ERP credentials, webhook endpoint, polling
/// policy, and the persisted circuit breaker snapshot.
///
/// `odoo_api_key` and `webhook_secret` hold plaintext once loaded through the
/// repository boundary; on disk they are ciphertext (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub name: String,
    pub odoo_url: String,
    pub odoo_db: String,
    pub odoo_username: String,
    pub odoo_api_key: String,
    pub webhook_url: String,
    pub webhook_secret: String,
    pub poll_interval_seconds: i64,
    pub enabled: bool,
    pub circuit_state: CircuitState,
    pub circuit_failure_count: i64,
    pub circuit_last_failure_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a new connection; the engine assigns id,
/// timestamps, and the initial (closed) circuit state.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub odoo_url: String,
    pub odoo_db: String,
    pub odoo_username: String,
    pub odoo_api_key: String,
    pub webhook_url: String,
    pub webhook_secret: String,
    pub poll_interval_seconds: i64,
}

impl NewConnection {
    /// Validates the invariants from §3: non-empty name/URL, positive interval.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.odoo_url.trim().is_empty() {
            return Err("odoo_url must not be empty".to_string());
        }
        if self.webhook_url.trim().is_empty() {
            return Err("webhook_url must not be empty".to_string());
        }
        if self.poll_interval_seconds < 1 {
            return Err("poll_interval_seconds must be positive".to_string());
        }
        Ok(())
    }
}

/// Fields an admin may update on an existing connection. `None` leaves the
/// current value unchanged (mirrors the CLI's `edit` blank-keeps-current UX).
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub odoo_url: Option<String>,
    pub odoo_db: Option<String>,
    pub odoo_username: Option<String>,
    pub odoo_api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub poll_interval_seconds: Option<i64>,
    pub enabled: Option<bool>,
}
