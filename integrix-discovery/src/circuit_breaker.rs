//! Per-service circuit breaker.
//!
//! ## States
//!
//! - **Closed**: Normal operation, discovery passes through
//! - **Open**: Discovery is rejected until `next_attempt`
//! - **Half-Open**: One trial request at a time tests recovery
//!
//! A closed breaker opens after `failure_threshold` consecutive failures. Once
//! `reset_timeout` has elapsed the next discovery moves it to half-open and is
//! admitted as the trial. `success_threshold` successes close it again; any
//! failure while half-open reopens it immediately.
//!
//! The breaker has no interior locking. The coordinator keeps one per service
//! inside a `DashMap`, so every check-and-transition runs under that entry's
//! lock and two callers can never both take the same trial slot.

use integrix_registry::CircuitBreakerPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, testing recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Number of half-open successes needed to close the circuit.
    pub success_threshold: u32,
    /// Time to wait before admitting a trial request.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerPolicy::default())
    }
}

impl From<&CircuitBreakerPolicy> for CircuitBreakerConfig {
    fn from(policy: &CircuitBreakerPolicy) -> Self {
        Self {
            failure_threshold: policy.failure_threshold,
            success_threshold: policy.success_threshold,
            reset_timeout: policy.reset_timeout(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold for recovery.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the reset timeout.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// How a request was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed, normal traffic
    Allowed,
    /// Breaker half-open, this request is the recovery trial
    Trial,
}

/// Rejection from an open breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Open, next trial allowed after the given wait
    Open { retry_after: Duration },
    /// Half-open with a trial already in flight
    TrialInFlight,
}

/// State change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Closed → open after reaching the failure threshold
    Opened { failures: u32 },
    /// Half-open → open after a failed trial
    Reopened,
    /// Half-open → closed after enough successful trials
    Closed,
}

/// Circuit breaker state for one service.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    // Set while a half-open trial has been admitted but not yet reported
    trial_started: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: 0,
            success_count: 0,
            last_failure: None,
            next_attempt: None,
            trial_started: None,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Successes recorded while half-open.
    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    /// Decide whether a request may proceed at `now`.
    ///
    /// An open breaker whose timeout has elapsed moves to half-open and admits
    /// the caller as the trial. A half-open breaker admits one trial at a time;
    /// a trial that never reports back stops blocking after `reset_timeout`.
    pub fn try_acquire(&mut self, now: Instant) -> Result<Admission, Rejection> {
        match self.state {
            CircuitState::Closed => Ok(Admission::Allowed),
            CircuitState::Open => match self.next_attempt {
                Some(at) if now < at => Err(Rejection::Open {
                    retry_after: at - now,
                }),
                _ => {
                    debug!(failures = self.failures, "Circuit breaker transitioning to half-open");
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.trial_started = Some(now);
                    Ok(Admission::Trial)
                }
            },
            CircuitState::HalfOpen => match self.trial_started {
                Some(started) if now.duration_since(started) < self.config.reset_timeout => {
                    Err(Rejection::TrialInFlight)
                }
                _ => {
                    self.trial_started = Some(now);
                    Ok(Admission::Trial)
                }
            },
        }
    }

    /// Give back a trial slot that was admitted but never dispatched.
    pub fn release_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_started = None;
        }
    }

    /// Record a successful request.
    pub fn record_success(&mut self) -> Transition {
        match self.state {
            CircuitState::Closed => {
                // Reset failure count on success
                self.failures = 0;
                Transition::None
            }
            CircuitState::HalfOpen => {
                self.trial_started = None;
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.close();
                    Transition::Closed
                } else {
                    Transition::None
                }
            }
            CircuitState::Open => {
                debug!("Success recorded while circuit open, ignoring");
                Transition::None
            }
        }
    }

    /// Record a failed request at `now`.
    pub fn record_failure(&mut self, now: Instant) -> Transition {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);

        match self.state {
            CircuitState::HalfOpen => {
                // Any failure in half-open state reopens the circuit
                self.open(now);
                Transition::Reopened
            }
            CircuitState::Closed if self.failures >= self.config.failure_threshold => {
                self.open(now);
                Transition::Opened {
                    failures: self.failures,
                }
            }
            CircuitState::Closed | CircuitState::Open => Transition::None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.next_attempt = Some(now + self.config.reset_timeout);
        self.success_count = 0;
        self.trial_started = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.success_count = 0;
        self.next_attempt = None;
        self.trial_started = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .failure_threshold(threshold)
                .success_threshold(2)
                .reset_timeout(Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let now = Instant::now();
        let mut cb = breaker(3);

        assert_eq!(cb.record_failure(now), Transition::None);
        assert_eq!(cb.record_failure(now), Transition::None);
        assert_eq!(cb.state(), CircuitState::Closed);

        assert_eq!(cb.record_failure(now), Transition::Opened { failures: 3 });
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.next_attempt(), Some(now + Duration::from_secs(60)));
        assert_eq!(cb.last_failure(), Some(now));
    }

    #[test]
    fn test_success_resets_failures_when_closed() {
        let now = Instant::now();
        let mut cb = breaker(3);

        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.failures(), 2);

        cb.record_success();
        assert_eq!(cb.failures(), 0);

        // Two more failures are not enough after the reset
        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_rejects_until_next_attempt() {
        let now = Instant::now();
        let mut cb = breaker(1);
        cb.record_failure(now);

        let early = now + Duration::from_secs(59);
        assert_eq!(
            cb.try_acquire(early),
            Err(Rejection::Open {
                retry_after: Duration::from_secs(1)
            })
        );

        let later = now + Duration::from_secs(60);
        assert_eq!(cb.try_acquire(later), Ok(Admission::Trial));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let now = Instant::now();
        let mut cb = breaker(1);
        cb.record_failure(now);

        let t = now + Duration::from_secs(61);
        assert_eq!(cb.try_acquire(t), Ok(Admission::Trial));
        assert_eq!(cb.try_acquire(t), Err(Rejection::TrialInFlight));

        // Reporting the trial frees the slot for the next one
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.try_acquire(t), Ok(Admission::Trial));
    }

    #[test]
    fn test_released_trial_can_be_retaken() {
        let now = Instant::now();
        let mut cb = breaker(1);
        cb.record_failure(now);

        let t = now + Duration::from_secs(61);
        assert_eq!(cb.try_acquire(t), Ok(Admission::Trial));
        cb.release_trial();
        assert_eq!(cb.try_acquire(t), Ok(Admission::Trial));
    }

    #[test]
    fn test_abandoned_trial_expires() {
        let now = Instant::now();
        let mut cb = breaker(1);
        cb.record_failure(now);

        let t = now + Duration::from_secs(61);
        assert_eq!(cb.try_acquire(t), Ok(Admission::Trial));
        assert_eq!(
            cb.try_acquire(t + Duration::from_secs(60)),
            Ok(Admission::Trial)
        );
    }

    #[test]
    fn test_half_open_failure_reopens_immediately() {
        let now = Instant::now();
        let mut cb = breaker(5);
        for _ in 0..5 {
            cb.record_failure(now);
        }

        let t = now + Duration::from_secs(60);
        cb.try_acquire(t).unwrap();
        cb.record_success();
        assert_eq!(cb.success_count(), 1);

        assert_eq!(cb.record_failure(t), Transition::Reopened);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.success_count(), 0);
        assert_eq!(cb.next_attempt(), Some(t + Duration::from_secs(60)));
    }

    #[test]
    fn test_success_threshold_closes() {
        let now = Instant::now();
        let mut cb = breaker(2);
        cb.record_failure(now);
        cb.record_failure(now);

        cb.try_acquire(now + Duration::from_secs(60)).unwrap();
        assert_eq!(cb.record_success(), Transition::None);
        assert_eq!(cb.record_success(), Transition::Closed);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        assert_eq!(cb.success_count(), 0);
        assert_eq!(cb.next_attempt(), None);
    }

    #[test]
    fn test_failures_while_open_only_count() {
        let now = Instant::now();
        let mut cb = breaker(1);
        cb.record_failure(now);
        let next_attempt = cb.next_attempt();

        assert_eq!(cb.record_failure(now + Duration::from_secs(5)), Transition::None);
        assert_eq!(cb.failures(), 2);
        assert_eq!(cb.next_attempt(), next_attempt);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(
            serde_json::to_value(CircuitState::HalfOpen).unwrap(),
            serde_json::json!("half-open")
        );
    }
}
