//! SQLite-backed store: pool, schema, and repository implementations.

pub mod connection_repository;
pub mod manager;
pub mod pool;
pub mod retry_queue_repository;
pub mod sent_order_repository;
pub mod sync_log_repository;

pub use connection_repository::SqliteConnectionRepository;
pub use manager::{DbConnection, DbManager};
pub use retry_queue_repository::SqliteRetryQueueRepository;
pub use sent_order_repository::SqliteSentOrderRepository;
pub use sync_log_repository::SqliteSyncLogRepository;
