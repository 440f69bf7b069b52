//! `PollWorker`: one poll cycle (§4.6).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use poller_common::CircuitBreaker;
use poller_domain::constants::{
    backoff_secs, CONFIRMED_STATES, DEFAULT_MAX_ATTEMPTS, ORDER_FIELDS, SEED_LIMIT,
    SENT_ORDER_RING, SYNC_LOG_LIMIT,
};
use poller_domain::{
    CircuitState as DomainCircuitState, Connection, NewRetryItem, NewSyncLog, PollerError,
    Result, RetryStatus, RetryStatusUpdate, SyncLog, WebhookPayload,
};
use tracing::{info, instrument, warn};

use crate::mapper::{fetch_batch_data, map_order_to_webhook_payload};
use crate::ports::{ErpClient, ErpRecord, Repositories, WebhookSender};

/// Converts between the persisted, serde-friendly `poller_domain::CircuitState`
/// and `poller_common::CircuitBreaker`'s runtime state vocabulary. The two
/// enums are kept separate on purpose: `poller-domain` has no dependency on
/// `poller-common`.
fn to_common_state(state: DomainCircuitState) -> poller_common::CircuitState {
    match state {
        DomainCircuitState::Closed => poller_common::CircuitState::Closed,
        DomainCircuitState::Open => poller_common::CircuitState::Open,
        DomainCircuitState::HalfOpen => poller_common::CircuitState::HalfOpen,
    }
}

fn to_domain_state(state: poller_common::CircuitState) -> DomainCircuitState {
    match state {
        poller_common::CircuitState::Closed => DomainCircuitState::Closed,
        poller_common::CircuitState::Open => DomainCircuitState::Open,
        poller_common::CircuitState::HalfOpen => DomainCircuitState::HalfOpen,
    }
}

/// Builds a breaker rehydrated from a connection's persisted snapshot.
#[must_use]
pub fn breaker_from_connection(connection: &Connection) -> CircuitBreaker {
    let breaker = CircuitBreaker::with_defaults();
    breaker.load_state(to_common_state(connection.circuit_state), connection.circuit_failure_count.max(0) as u64);
    breaker
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    found: i64,
    sent: i64,
    failed: i64,
    skipped: i64,
}

/// Runs one cycle for a single connection against its own `ErpClient`,
/// `WebhookSender`, and `CircuitBreaker`.
pub struct PollWorker {
    pub erp: Arc<dyn ErpClient>,
    pub webhook: Arc<dyn WebhookSender>,
    pub breaker: Arc<CircuitBreaker>,
    pub repos: Repositories,
}

impl PollWorker {
    #[instrument(skip(self), fields(connection_id = connection.id))]
    pub async fn execute(&self, connection: &Connection) -> Result<Option<SyncLog>> {
        if !self.breaker.check_allowed() {
            return Ok(None);
        }

        let started_at = Utc::now();
        let result = self.run_cycle(connection, started_at).await;

        let (counts, error_message) = match &result {
            Ok(counts) => (*counts, None),
            Err(err) => (Counts::default(), Some(err.to_string())),
        };

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.is_rate_limited() => {
                warn!(connection_id = connection.id, "rate limited; breaker not penalized");
            }
            Err(_) => self.breaker.record_failure(),
        }

        self.persist_breaker(connection.id).await?;

        let new_log = NewSyncLog {
            connection_id: connection.id,
            started_at,
            finished_at: Utc::now(),
            found: counts.found,
            sent: counts.sent,
            failed: counts.failed,
            skipped: counts.skipped,
            error_message,
        };
        let log = self.repos.sync_logs.append(new_log).await?;
        self.repos.sync_logs.trim_to_limit(connection.id, SYNC_LOG_LIMIT).await?;

        Ok(Some(log))
    }

    async fn persist_breaker(&self, connection_id: i64) -> Result<()> {
        let metrics = self.breaker.metrics();
        let state = to_domain_state(metrics.state);
        #[allow(clippy::cast_possible_wrap)]
        let failure_count = metrics.failure_count as i64;
        self.repos.connections.update_circuit_state(connection_id, state, failure_count).await
    }

    async fn run_cycle(&self, connection: &Connection, now: DateTime<Utc>) -> Result<Counts> {
        let counts = if connection.last_sync_at.as_deref().unwrap_or("").is_empty() {
            self.run_seed(connection).await?
        } else {
            self.run_discovery(connection).await?
        };

        self.process_retries(connection, now).await?;
        self.repos.retry_queue.cleanup_finished(connection.id).await?;
        self.repos.sent_orders.trim_to_limit(connection.id, SENT_ORDER_RING).await?;

        Ok(counts)
    }

    /// First-ever cycle: record the latest orders without delivering
    /// webhooks, to avoid a delivery storm on activation (§4.6 step 3).
    async fn run_seed(&self, connection: &Connection) -> Result<Counts> {
        let domain = serde_json::json!([["state", "in", CONFIRMED_STATES]]);
        let orders =
            self.erp.search_read("sale.order", domain, ORDER_FIELDS, SEED_LIMIT, "write_date desc").await?;

        let mut max_write_date: Option<String> = None;
        for order in &orders {
            let order_id = field_i64(order, "id");
            let write_date = field_str(order, "write_date");
            self.repos.sent_orders.mark_sent(connection.id, order_id, &write_date).await?;
            let is_newer = match max_write_date.as_deref() {
                Some(m) => write_date.as_str() > m,
                None => true,
            };
            if is_newer {
                max_write_date = Some(write_date);
            }
        }

        if let Some(write_date) = max_write_date {
            self.repos.connections.update_last_sync_at(connection.id, &write_date).await?;
        }

        let found = orders.len() as i64;
        info!(connection_id = connection.id, found, "seed cycle recorded orders without delivery");
        Ok(Counts { found, sent: 0, failed: 0, skipped: found })
    }

    /// Delta sync: fetch orders newer than the cursor, filter against the
    /// sent ledger, and deliver each newly observed order (§4.6 steps 4-9).
    async fn run_discovery(&self, connection: &Connection) -> Result<Counts> {
        let last_sync_at = connection.last_sync_at.clone().unwrap_or_default();
        let domain = serde_json::json!([
            ["state", "in", CONFIRMED_STATES],
            ["write_date", ">", last_sync_at],
        ]);
        let orders =
            self.erp.search_read("sale.order", domain, ORDER_FIELDS, 0, "write_date asc").await?;

        let found = orders.len() as i64;
        let sent_ids = self.repos.sent_orders.get_sent_ids(connection.id).await?;

        let mut new_orders = Vec::new();
        let mut skipped = 0i64;
        for order in orders {
            let key = (field_i64(&order, "id"), field_str(&order, "write_date"));
            if sent_ids.contains(&key) {
                skipped += 1;
            } else {
                new_orders.push(order);
            }
        }

        if new_orders.is_empty() {
            return Ok(Counts { found, sent: 0, failed: 0, skipped });
        }

        let batch = fetch_batch_data(self.erp.as_ref(), &new_orders).await?;

        let mut sent = 0i64;
        let mut failed = 0i64;
        let mut max_write_date: Option<String> = None;

        for order in &new_orders {
            let order_id = field_i64(order, "id");
            let order_name = field_str(order, "name");
            let write_date = field_str(order, "write_date");
            let payload =
                map_order_to_webhook_payload(order, &batch, &connection.odoo_db, connection.id);

            match self
                .webhook
                .send(&connection.webhook_url, &payload, &connection.webhook_secret, connection.id)
                .await
            {
                Ok(()) => {
                    self.repos.sent_orders.mark_sent(connection.id, order_id, &write_date).await?;
                    sent += 1;
                }
                Err(err) => {
                    warn!(connection_id = connection.id, order_id, error = %err, "webhook delivery failed; enqueued for retry");
                    let payload_json = serde_json::to_value(&payload)
                        .map_err(|e| PollerError::store("serialize_retry_payload", e))?;
                    self.repos
                        .retry_queue
                        .enqueue(NewRetryItem {
                            connection_id: connection.id,
                            order_id,
                            order_name,
                            payload: payload_json,
                            next_retry_at: Utc::now() + Duration::seconds(backoff_secs(0)),
                            max_attempts: DEFAULT_MAX_ATTEMPTS,
                        })
                        .await?;
                    failed += 1;
                }
            }

            let is_newer = match max_write_date.as_deref() {
                Some(m) => write_date.as_str() > m,
                None => true,
            };
            if is_newer {
                max_write_date = Some(write_date);
            }
        }

        if let Some(write_date) = max_write_date {
            self.repos.connections.update_last_sync_at(connection.id, &write_date).await?;
        }

        Ok(Counts { found, sent, failed, skipped })
    }

    /// Drains pending retry items due for redelivery (§4.6 step 10). Outcomes
    /// here never touch the circuit breaker directly.
    async fn process_retries(&self, connection: &Connection, now: DateTime<Utc>) -> Result<()> {
        let pending = self.repos.retry_queue.get_pending(connection.id, now).await?;

        for item in pending {
            if item.attempts >= item.max_attempts {
                self.repos
                    .retry_queue
                    .update_status(
                        item.id,
                        RetryStatusUpdate {
                            status: Some(RetryStatus::Discarded),
                            last_error: Some("Max attempts reached".to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                continue;
            }

            let payload: WebhookPayload = match serde_json::from_value(item.payload.clone()) {
                Ok(p) => p,
                Err(err) => {
                    warn!(retry_id = item.id, error = %err, "frozen retry payload is malformed; discarding");
                    self.repos
                        .retry_queue
                        .update_status(
                            item.id,
                            RetryStatusUpdate {
                                status: Some(RetryStatus::Discarded),
                                last_error: Some(format!("malformed payload: {err}")),
                                ..Default::default()
                            },
                        )
                        .await?;
                    continue;
                }
            };

            match self
                .webhook
                .send(&connection.webhook_url, &payload, &connection.webhook_secret, connection.id)
                .await
            {
                Ok(()) => {
                    self.repos
                        .retry_queue
                        .update_status(
                            item.id,
                            RetryStatusUpdate { status: Some(RetryStatus::Sent), ..Default::default() },
                        )
                        .await?;
                    self.repos
                        .sent_orders
                        .mark_sent(connection.id, item.order_id, &payload.order.write_date)
                        .await?;
                }
                Err(err) => {
                    let attempts = item.attempts + 1;
                    let attempt_index = u32::try_from(attempts).unwrap_or(u32::MAX);
                    let next_retry_at = now + Duration::seconds(backoff_secs(attempt_index));
                    self.repos
                        .retry_queue
                        .update_status(
                            item.id,
                            RetryStatusUpdate {
                                status: Some(RetryStatus::Pending),
                                attempts: Some(attempts),
                                next_retry_at: Some(next_retry_at),
                                last_error: Some(err.to_string()),
                            },
                        )
                        .await?;
                }
            }
        }

        Ok(())
    }
}

fn field_str(record: &ErpRecord, field: &str) -> String {
    record.get(field).and_then(serde_json::Value::as_str).unwrap_or_default().to_string()
}

fn field_i64(record: &ErpRecord, field: &str) -> i64 {
    record.get(field).and_then(serde_json::Value::as_i64).unwrap_or(0)
}
