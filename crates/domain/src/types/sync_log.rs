//! `SyncLog`: one row per poll cycle attempt (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: i64,
    pub connection_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub found: i64,
    pub sent: i64,
    pub failed: i64,
    pub skipped: i64,
    pub error_message: Option<String>,
}

/// A `SyncLog` before it has an assigned id / timestamps, as produced by the
/// `PollWorker` at the end of a cycle.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub connection_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub found: i64,
    pub sent: i64,
    pub failed: i64,
    pub skipped: i64,
    pub error_message: Option<String>,
}
