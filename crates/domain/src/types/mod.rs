//! Domain data types: the five persisted entities plus the dynamic ERP
//! record shape and the outbound webhook document (§3, §6, §9).

pub mod connection;
pub mod erp_ref;
pub mod retry_item;
pub mod sent_order;
pub mod sync_log;
pub mod webhook;

pub use connection::{CircuitState, Connection, ConnectionUpdate, NewConnection};
pub use erp_ref::Ref;
pub use retry_item::{NewRetryItem, RetryItem, RetryQueueSummary, RetryStatus, RetryStatusUpdate};
pub use sent_order::{SentOrder, SentOrderKey};
pub use sync_log::{NewSyncLog, SyncLog};
pub use webhook::{Address, Item, OrderSummary, Party, WebhookPayload};
