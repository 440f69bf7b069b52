//! Generic resilience and cryptographic primitives shared across poller
//! crates. Unlike the domain and core crates, nothing here knows about
//! connections, orders, or webhooks — these are library-quality building
//! blocks consumed by `poller-core`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod crypto;
pub mod resilience;

pub use crypto::FieldCipher;
pub use resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, Clock, ConfigError, ConfigResult, MockClock, SyncCircuitBreaker, SystemClock,
};
