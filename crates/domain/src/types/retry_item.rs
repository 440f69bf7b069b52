//! `RetryItem`: one pending or terminal redelivery attempt (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    Sent,
    Discarded,
}

impl RetryStatus {
    /// `sent` and `discarded` are terminal (§3 invariants).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Discarded)
    }
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Discarded => "discarded",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RetryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "discarded" => Ok(Self::Discarded),
            other => Err(format!("unknown retry status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryItem {
    pub id: i64,
    pub connection_id: i64,
    pub order_id: i64,
    pub order_name: String,
    /// The exact payload that was to be delivered, frozen at enqueue time.
    pub payload: serde_json::Value,
    pub status: RetryStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRetryItem {
    pub connection_id: i64,
    pub order_id: i64,
    pub order_name: String,
    pub payload: serde_json::Value,
    pub next_retry_at: DateTime<Utc>,
    pub max_attempts: i64,
}

/// Coalescing update for `RetryQueueRepository::update_status`: unspecified
/// (`None`) fields are left unchanged on the stored row (§4.1).
#[derive(Debug, Clone, Default)]
pub struct RetryStatusUpdate {
    pub status: Option<RetryStatus>,
    pub attempts: Option<i64>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Per-status row counts, returned by the store's retry-queue summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryQueueSummary {
    pub pending: i64,
    pub sent: i64,
    pub discarded: i64,
}
