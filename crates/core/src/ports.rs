//! Trait boundaries between the polling engine and its infrastructure (§4.1,
//! §4.2, §4.4). `poller-core` depends only on these traits; concrete
//! implementations live in `poller-infra`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poller_domain::{
    CircuitState, Connection, ConnectionUpdate, NewConnection, NewRetryItem, NewSyncLog, Result,
    RetryItem, RetryQueueSummary, RetryStatusUpdate, SentOrder, SyncLog, WebhookPayload,
};
use std::collections::HashSet;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Sorted by name. `enabled_only` filters to `enabled = true`.
    async fn list(&self, enabled_only: bool) -> Result<Vec<Connection>>;
    async fn get(&self, id: i64) -> Result<Option<Connection>>;
    async fn create(&self, new: NewConnection) -> Result<Connection>;
    async fn update(&self, id: i64, update: ConnectionUpdate) -> Result<Connection>;
    async fn delete(&self, id: i64) -> Result<()>;
    /// Sets `circuit_last_failure_at` iff `state` is `Open`.
    async fn update_circuit_state(
        &self,
        id: i64,
        state: CircuitState,
        failure_count: i64,
    ) -> Result<()>;
    async fn update_last_sync_at(&self, id: i64, last_sync_at: &str) -> Result<()>;
}

#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    async fn append(&self, log: NewSyncLog) -> Result<SyncLog>;
    async fn list_recent(&self, connection_id: i64, limit: i64) -> Result<Vec<SyncLog>>;
    /// Deletes rows outside the `limit` most recent by id for this connection.
    async fn trim_to_limit(&self, connection_id: i64, limit: i64) -> Result<()>;
}

#[async_trait]
pub trait RetryQueueRepository: Send + Sync {
    async fn enqueue(&self, item: NewRetryItem) -> Result<RetryItem>;
    async fn get(&self, id: i64) -> Result<Option<RetryItem>>;
    /// Pending rows with `next_retry_at <= now`, ordered by `next_retry_at` asc.
    async fn get_pending(&self, connection_id: i64, now: DateTime<Utc>) -> Result<Vec<RetryItem>>;
    /// Coalescing: `None` fields in `update` leave the stored value unchanged.
    async fn update_status(&self, id: i64, update: RetryStatusUpdate) -> Result<()>;
    async fn list_by_connection(&self, connection_id: i64) -> Result<Vec<RetryItem>>;
    /// Deletes every terminal (`sent`/`discarded`) row for the connection.
    async fn cleanup_finished(&self, connection_id: i64) -> Result<u64>;
    async fn summary(&self, connection_id: i64) -> Result<RetryQueueSummary>;
}

#[async_trait]
pub trait SentOrderRepository: Send + Sync {
    /// Idempotent on `(connection_id, order_id, write_date)`: silently a
    /// no-op on conflict.
    async fn mark_sent(&self, connection_id: i64, order_id: i64, write_date: &str) -> Result<()>;
    async fn is_sent(&self, connection_id: i64, order_id: i64, write_date: &str) -> Result<bool>;
    async fn get_sent_ids(&self, connection_id: i64) -> Result<HashSet<(i64, String)>>;
    async fn list_recent(&self, connection_id: i64, limit: i64) -> Result<Vec<SentOrder>>;
    /// Keeps the `limit` most recent rows by `sent_at` for the connection.
    async fn trim_to_limit(&self, connection_id: i64, limit: i64) -> Result<()>;
}

/// A record as returned by the ERP's RPC layer: an unordered field-name to
/// value mapping. Many-to-one fields arrive as `[id, name]` tuples or `false`.
pub type ErpRecord = serde_json::Map<String, serde_json::Value>;

/// Capability for talking to a single ERP tenant (§4.2).
#[async_trait]
pub trait ErpClient: Send + Sync {
    /// Caches `uid` on success. Fails with `PollerError::Auth` on rejected
    /// credentials.
    async fn authenticate(&self) -> Result<i64>;

    async fn search_read(
        &self,
        model: &str,
        domain: serde_json::Value,
        fields: &[&str],
        limit: i64,
        order: &str,
    ) -> Result<Vec<ErpRecord>>;

    async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<ErpRecord>>;
}

/// Builds a connection-scoped `ErpClient`, giving each connection its own
/// transport handle and cached session (§5, §4.7 step 2).
pub trait ErpClientFactory: Send + Sync {
    fn build(&self, connection: &Connection) -> Result<std::sync::Arc<dyn ErpClient>>;
}

/// Capability for delivering one webhook payload (§4.4).
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Returns `Ok(())` on any 2xx response. Any other response, or a
    /// transport failure, returns `PollerError::Send`.
    async fn send(
        &self,
        url: &str,
        payload: &WebhookPayload,
        secret: &str,
        connection_id: i64,
    ) -> Result<()>;
}

/// Bundles the four store repositories a `PollWorker` needs for one cycle.
#[derive(Clone)]
pub struct Repositories {
    pub connections: std::sync::Arc<dyn ConnectionRepository>,
    pub sync_logs: std::sync::Arc<dyn SyncLogRepository>,
    pub retry_queue: std::sync::Arc<dyn RetryQueueRepository>,
    pub sent_orders: std::sync::Arc<dyn SentOrderRepository>,
}
