//! # poller-core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) infra implements
//! - Batch enrichment and webhook payload shaping
//! - The poll cycle and the per-connection scheduler
//!
//! ## Architecture Principles
//! - Only depends on `poller-common` and `poller-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod mapper;
pub mod ports;
pub mod scheduler;
pub mod worker;

pub use mapper::{fetch_batch_data, map_order_to_webhook_payload, BatchData};
pub use ports::{
    ConnectionRepository, ErpClient, ErpClientFactory, ErpRecord, Repositories,
    RetryQueueRepository, SentOrderRepository, SyncLogRepository, WebhookSender,
};
pub use scheduler::{OnCircuitStateChange, OnSyncComplete, Scheduler};
pub use worker::{breaker_from_connection, PollWorker};
