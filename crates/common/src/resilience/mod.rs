//! Generic circuit breaker for fault-tolerant outbound calls.
//!
//! Scope note: the workspace's webhook retry schedule is a fixed lookup
//! table (`poller_domain::constants::backoff_secs`), not a configurable
//! strategy, so the generic backoff/jitter machinery this module used to
//! carry alongside the circuit breaker has no remaining use here and was
//! dropped.

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, Clock, ConfigError, ConfigResult, MockClock, SyncCircuitBreaker, SystemClock,
};
