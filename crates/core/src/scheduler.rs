//! Per-connection scheduler (§4.7, §5).
//!
//! Each enabled connection owns exactly one long-lived task, its own
//! transport handle (via `ErpClientFactory`), and its own `CircuitBreaker`.
//! Tasks never share mutable state; the scheduler's own state (the task
//! table) is the only thing more than one call site touches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use poller_common::CircuitBreaker;
use poller_domain::{CircuitState, Connection, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ports::{ErpClientFactory, Repositories, WebhookSender};
use crate::worker::{breaker_from_connection, PollWorker};

const SHUTDOWN_JOIN_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Invoked after every cycle that produced a `SyncLog` (i.e. every cycle
/// that wasn't gated closed by an open breaker).
pub type OnSyncComplete = Arc<dyn Fn(i64, poller_domain::SyncLog) + Send + Sync>;
/// Invoked when a connection's breaker state differs from its pre-cycle
/// value.
pub type OnCircuitStateChange = Arc<dyn Fn(i64, CircuitState) + Send + Sync>;

struct ConnectionTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    breaker: Arc<CircuitBreaker>,
}

/// Owns the fleet of per-connection poll loops.
pub struct Scheduler {
    repos: Repositories,
    erp_factory: Arc<dyn ErpClientFactory>,
    webhook: Arc<dyn WebhookSender>,
    tasks: Mutex<HashMap<i64, ConnectionTask>>,
    on_sync_complete: OnSyncComplete,
    on_circuit_state_change: OnCircuitStateChange,
}

impl Scheduler {
    pub fn new(
        repos: Repositories,
        erp_factory: Arc<dyn ErpClientFactory>,
        webhook: Arc<dyn WebhookSender>,
    ) -> Self {
        Self {
            repos,
            erp_factory,
            webhook,
            tasks: Mutex::new(HashMap::new()),
            on_sync_complete: Arc::new(|_, _| {}),
            on_circuit_state_change: Arc::new(|_, _| {}),
        }
    }

    #[must_use]
    pub fn with_callbacks(
        mut self,
        on_sync_complete: OnSyncComplete,
        on_circuit_state_change: OnCircuitStateChange,
    ) -> Self {
        self.on_sync_complete = on_sync_complete;
        self.on_circuit_state_change = on_circuit_state_change;
        self
    }

    /// Loads every enabled connection and spawns its loop.
    pub async fn start(&self) -> Result<()> {
        info!("starting scheduler");
        let connections = self.repos.connections.list(true).await?;
        for connection in connections {
            self.add_connection(&connection).await?;
        }
        Ok(())
    }

    /// Cancels every loop and waits (bounded) for each to finish.
    pub async fn stop(&self) {
        info!("stopping scheduler");
        let mut tasks = self.tasks.lock().await;
        for (id, task) in tasks.drain() {
            task.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task.handle).await.is_err() {
                warn!(connection_id = id, "connection task did not stop within shutdown timeout; abandoning");
            }
        }
    }

    /// Idempotent: a connection that already has a running task is left alone.
    pub async fn add_connection(&self, connection: &Connection) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&connection.id) {
            return Ok(());
        }
        if !connection.enabled {
            return Ok(());
        }

        let breaker = Arc::new(breaker_from_connection(connection));
        let cancel = CancellationToken::new();

        let erp = self.erp_factory.build(connection)?;
        let worker = Arc::new(PollWorker {
            erp,
            webhook: Arc::clone(&self.webhook),
            breaker: Arc::clone(&breaker),
            repos: self.repos.clone(),
        });

        let connection_id = connection.id;
        let repos = self.repos.clone();
        let loop_cancel = cancel.clone();
        let on_sync_complete = Arc::clone(&self.on_sync_complete);
        let on_circuit_state_change = Arc::clone(&self.on_circuit_state_change);
        let loop_breaker = Arc::clone(&breaker);

        let handle = tokio::spawn(async move {
            run_loop(
                connection_id,
                repos,
                worker,
                loop_breaker,
                loop_cancel,
                on_sync_complete,
                on_circuit_state_change,
            )
            .await;
        });

        tasks.insert(connection_id, ConnectionTask { cancel, handle, breaker });
        Ok(())
    }

    /// Cancels and forgets a connection's task, if any.
    pub async fn remove_connection(&self, id: i64) {
        let task = self.tasks.lock().await.remove(&id);
        if let Some(task) = task {
            task.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task.handle).await.is_err() {
                warn!(connection_id = id, "connection task did not stop within shutdown timeout; abandoning");
            }
        }
    }

    pub async fn restart_connection(&self, connection: &Connection) -> Result<()> {
        self.remove_connection(connection.id).await;
        if connection.enabled {
            self.add_connection(connection).await?;
        }
        Ok(())
    }

    /// In-memory reset plus persistence; fires the state-change callback.
    pub async fn reset_circuit_breaker(&self, id: i64) -> Result<()> {
        let breaker = {
            let tasks = self.tasks.lock().await;
            tasks.get(&id).map(|task| Arc::clone(&task.breaker))
        };
        if let Some(breaker) = breaker {
            breaker.reset();
        }
        self.repos.connections.update_circuit_state(id, CircuitState::Closed, 0).await?;
        (self.on_circuit_state_change)(id, CircuitState::Closed);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    connection_id: i64,
    repos: Repositories,
    worker: Arc<PollWorker>,
    breaker: Arc<CircuitBreaker>,
    cancel: CancellationToken,
    on_sync_complete: OnSyncComplete,
    on_circuit_state_change: OnCircuitStateChange,
) {
    loop {
        if cancel.is_cancelled() {
            debug!(connection_id, "connection loop cancelled");
            break;
        }

        let connection = tokio::select! {
            _ = cancel.cancelled() => break,
            result = repos.connections.get(connection_id) => match result {
                Ok(Some(conn)) if conn.enabled => conn,
                Ok(_) => {
                    debug!(connection_id, "connection missing or disabled; stopping loop");
                    break;
                }
                Err(err) => {
                    error!(connection_id, error = %err, "failed to reload connection; stopping loop");
                    break;
                }
            },
        };

        let pre_cycle_state = breaker.state();

        match worker.execute(&connection).await {
            Ok(Some(log)) => on_sync_complete(connection_id, log),
            Ok(None) => debug!(connection_id, "cycle skipped: breaker open"),
            Err(err) => error!(connection_id, error = %err, "poll cycle failed unexpectedly"),
        }

        let post_cycle_state = breaker.state();
        if post_cycle_state != pre_cycle_state {
            on_circuit_state_change(connection_id, to_domain_state(post_cycle_state));
        }

        let sleep_for = StdDuration::from_secs(connection.poll_interval_seconds.max(1) as u64);
        tokio::select! {
            _ = cancel.cancelled() => break,
            () = tokio::time::sleep(sleep_for) => {}
        }
    }
}

fn to_domain_state(state: poller_common::CircuitState) -> CircuitState {
    match state {
        poller_common::CircuitState::Closed => CircuitState::Closed,
        poller_common::CircuitState::Open => CircuitState::Open,
        poller_common::CircuitState::HalfOpen => CircuitState::HalfOpen,
    }
}
