//! # poller-infra
//!
//! Infrastructure implementations of the ports `poller-core` defines.
//!
//! This crate contains:
//! - The SQLite-backed store (connection pool, schema, repositories)
//! - The JSON-RPC ERP client and webhook sender
//!
//! ## Architecture
//! - Implements traits defined in `poller-core`
//! - Depends on `poller-common` and `poller-domain`
//! - Contains all "impure" code (I/O)

pub mod database;
pub mod errors;
pub mod http;
