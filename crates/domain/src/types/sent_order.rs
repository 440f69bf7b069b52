//! `SentOrder`: idempotency ledger (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentOrder {
    pub id: i64,
    pub connection_id: i64,
    pub order_id: i64,
    pub write_date: String,
    pub sent_at: DateTime<Utc>,
}

/// The natural key used by the idempotency filter (§3, §4.6 step 5).
pub type SentOrderKey = (i64, String);
