//! Conversions from driver-level errors into the shared [`PollerError`] (§7).
//!
//! Infra has no error type of its own: every repository and transport maps
//! its failures straight into `poller_domain::PollerError` at the boundary,
//! tagged with the operation that failed.

use poller_domain::PollerError;

pub fn map_sqlite_error(operation: &str, err: rusqlite::Error) -> PollerError {
    PollerError::store(operation.to_string(), err)
}

pub fn map_r2d2_error(operation: &str, err: r2d2::Error) -> PollerError {
    PollerError::store(operation.to_string(), err)
}

pub fn map_join_error(operation: &str, err: tokio::task::JoinError) -> PollerError {
    PollerError::store(operation.to_string(), err)
}

pub fn map_serde_error(operation: &str, err: serde_json::Error) -> PollerError {
    PollerError::store(operation.to_string(), err)
}
