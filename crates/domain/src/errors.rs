//! Error taxonomy shared by every component of the polling engine (§7).
//!
//! Distinctions between variants matter for circuit breaker accounting
//! (`PollWorker` §4.6): a `RateLimited` error must never count as a breaker
//! failure, while `Auth`/`Rpc`/`Transport` do.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollerError {
    /// Session expired or credentials rejected, after the client's single
    /// transparent re-authentication attempt also failed.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Upstream signalled throttling (e.g. HTTP 429). Never penalizes the
    /// breaker: the upstream is healthy, just busy.
    #[error("rate limited by upstream")]
    RateLimited,

    /// Any other upstream protocol-level failure (JSON-RPC error envelope).
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Connection/timeout failures talking to the ERP or the webhook.
    #[error("transport error: {0}")]
    Transport(String),

    /// Webhook responded with a status >= 400, or the request itself failed.
    #[error("webhook delivery failed (status={status:?}): {body_prefix}")]
    Send {
        status: Option<u16>,
        body_prefix: String,
    },

    /// A repository operation failed against the underlying store.
    #[error("store error in {operation}: {source}")]
    Store {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An environment variable was missing or failed to parse.
    #[error("configuration error for {variable}: {reason}")]
    Config { variable: String, reason: String },
}

impl PollerError {
    /// True for errors that must not count against the circuit breaker.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    pub fn store(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn config(variable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            variable: variable.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PollerError>;
