//! Three-state circuit breaker with lazy transition on read.
//!
//! Unlike a timer-driven breaker, `open -> half_open` only happens when
//! something asks whether a call is allowed (`check_allowed()` or `state()`)
//! after the recovery timeout has elapsed. There is no background task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

/// Abstraction over monotonic time so breaker transitions can be tested
/// without real sleeps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests: starts at `Instant::now()` and only moves
/// when `advance` is called.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<std::sync::Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(std::sync::Mutex::new(Duration::ZERO)) }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO);
        self.start + elapsed
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid circuit breaker configuration: {message}")]
    Invalid { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker state. `Display`/persistence use the lowercase spec
/// vocabulary (`closed`, `open`, `half_open`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

impl std::str::FromStr for CircuitState {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            other => Err(ConfigError::Invalid { message: format!("unknown circuit state: {other}") }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(120),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
}

/// Per-connection circuit breaker. Cheap to clone (shares inner state via
/// `Arc`), so the scheduler can hand a handle to each connection's task.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: Arc<AtomicU64>,
    success_count: Arc<AtomicU64>,
    last_failure_at: Arc<RwLock<Option<Instant>>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            failure_count: Arc::clone(&self.failure_count),
            success_count: Arc::clone(&self.success_count),
            last_failure_at: Arc::clone(&self.last_failure_at),
            clock: Arc::clone(&self.clock),
        }
    }
}

pub type SyncCircuitBreaker = CircuitBreaker<SystemClock>;

impl CircuitBreaker<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("default config is valid")
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU64::new(0)),
            success_count: Arc::new(AtomicU64::new(0)),
            last_failure_at: Arc::new(RwLock::new(None)),
            clock: Arc::new(clock),
        })
    }

    /// Rehydrate from persisted `(state, failure_count)`. A breaker loaded
    /// as `open` starts its recovery timer from now rather than from the
    /// (unknown) original failure time.
    pub fn load_state(&self, state: CircuitState, failure_count: u64) {
        self.failure_count.store(failure_count, Ordering::Release);
        if state == CircuitState::Open {
            if let Ok(mut last_failure) = self.last_failure_at.write() {
                *last_failure = Some(self.clock.now());
            }
        }
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }

    /// Read-only except for the lazy `open -> half_open` transition.
    pub fn state(&self) -> CircuitState {
        let current = self.read_state();
        if current != CircuitState::Open {
            return current;
        }

        let elapsed = self
            .last_failure_at
            .read()
            .ok()
            .and_then(|guard| *guard)
            .map(|failure_time| self.clock.now().duration_since(failure_time));

        match elapsed {
            Some(elapsed) if elapsed >= self.config.recovery_timeout => {
                if let Ok(mut guard) = self.state.write() {
                    if *guard == CircuitState::Open {
                        *guard = CircuitState::HalfOpen;
                        self.success_count.store(0, Ordering::Release);
                        info!("circuit breaker transitioned to half_open after recovery timeout");
                    }
                    *guard
                } else {
                    current
                }
            }
            _ => current,
        }
    }

    /// True in `closed` and `half_open`; false in `open`. May itself drive
    /// the `open -> half_open` transition.
    pub fn check_allowed(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    if let Ok(mut guard) = self.state.write() {
                        *guard = CircuitState::Closed;
                    }
                    self.failure_count.store(0, Ordering::Release);
                    self.success_count.store(0, Ordering::Release);
                    info!("circuit breaker closed after {successes} half-open successes");
                }
            }
            CircuitState::Open => {
                warn!("record_success called while circuit breaker open");
            }
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    if let Ok(mut guard) = self.state.write() {
                        *guard = CircuitState::Open;
                    }
                    if let Ok(mut last_failure) = self.last_failure_at.write() {
                        *last_failure = Some(now);
                    }
                    warn!("circuit breaker opened after {failures} failures");
                }
            }
            CircuitState::HalfOpen => {
                if let Ok(mut guard) = self.state.write() {
                    *guard = CircuitState::Open;
                }
                if let Ok(mut last_failure) = self.last_failure_at.write() {
                    *last_failure = Some(now);
                }
                self.success_count.store(0, Ordering::Release);
                warn!("circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        if let Ok(mut last_failure) = self.last_failure_at.write() {
            *last_failure = None;
        }
        if let Ok(mut guard) = self.state.write() {
            *guard = CircuitState::Closed;
        }
        info!("circuit breaker manually reset to closed");
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
        }
    }

    fn read_state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned, recovering");
                *poisoned.into_inner()
            }
        }
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn state_display_matches_persistence_vocabulary() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[test]
    fn state_round_trips_through_from_str() {
        for s in ["closed", "open", "half_open"] {
            assert_eq!(CircuitState::from_str(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn closed_breaker_allows_calls() {
        let cb = CircuitBreaker::default();
        assert!(cb.check_allowed());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_failure_threshold() {
        let config = CircuitBreakerConfig::builder().failure_threshold(3).build().unwrap();
        let cb = CircuitBreaker::new(config).unwrap();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed, "below threshold stays closed");

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.check_allowed());
    }

    #[test]
    fn success_resets_failure_count_in_closed() {
        let config = CircuitBreakerConfig::builder().failure_threshold(5).build().unwrap();
        let cb = CircuitBreaker::new(config).unwrap();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn transitions_to_half_open_after_recovery_timeout() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(120))
            .build()
            .unwrap();
        let cb = CircuitBreaker::with_clock(config, clock.clone()).unwrap();

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Open, "timeout not yet elapsed");

        clock.advance(Duration::from_secs(61));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check_allowed());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .success_threshold(2)
            .recovery_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let cb = CircuitBreaker::with_clock(config, clock.clone()).unwrap();

        cb.record_failure();
        clock.advance(Duration::from_secs(11));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen, "below success threshold");

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let cb = CircuitBreaker::with_clock(config, clock.clone()).unwrap();

        cb.record_failure();
        clock.advance(Duration::from_secs(11));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn load_state_rehydrates_from_persistence() {
        let cb = CircuitBreaker::default();
        cb.load_state(CircuitState::Open, 7);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 7);
    }

    #[test]
    fn load_state_open_starts_recovery_timer_from_now() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .recovery_timeout(Duration::from_secs(120))
            .build()
            .unwrap();
        let cb = CircuitBreaker::with_clock(config, clock.clone()).unwrap();

        cb.load_state(CircuitState::Open, 5);
        clock.advance(Duration::from_secs(119));
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(2));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn reset_forces_closed_with_zero_counts() {
        let config = CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap();
        let cb = CircuitBreaker::new(config).unwrap();

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn config_rejects_zero_thresholds() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
    }
}
