//! # Order Poller Domain
//!
//! Pure domain models for the multi-tenant ERP order polling engine.
//!
//! This crate contains:
//! - Domain data types: `Connection`, `SyncLog`, `RetryItem`, `SentOrder`,
//!   the `Ref` sum type for dynamic ERP record shapes, and the outbound
//!   webhook payload.
//! - The workspace error taxonomy (`PollerError`).
//! - Process configuration (`Config`).
//! - Constants pinned by the specification's boundary behaviors.
//!
//! ## Architecture
//! - No dependencies on other workspace crates.
//! - Pure domain models and data structures only.

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

pub use config::Config;
pub use errors::{PollerError, Result};
pub use types::*;
