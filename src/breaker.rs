//! Circuit breaker (C7, spec §4.7).
//!
//! Three states, thread-safe via a single mutex: `closed` counts
//! consecutive failures; at `threshold` it opens; `open` rejects calls
//! until `timeout` has elapsed since the last failure, then the next call
//! becomes a half-open probe; `half_open` closes on success or reopens
//! (restarting the timer) on failure.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState::Closed
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

/// Per-pool failure gate (spec §4.6: "fatal error on any pool operation
/// counts toward the circuit breaker").
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

/// Whether a call may proceed, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermission {
    Allowed,
    /// A half-open probe: the caller must report its outcome via
    /// [`CircuitBreaker::record_success`]/[`CircuitBreaker::record_failure`].
    Probe,
    Rejected,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        CircuitBreaker {
            threshold,
            timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("circuit breaker mutex poisoned").consecutive_failures
    }

    /// Call before attempting the gated operation.
    pub fn try_acquire(&self) -> CallPermission {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => CallPermission::Allowed,
            BreakerState::HalfOpen => CallPermission::Probe,
            BreakerState::Open => {
                let elapsed = inner.last_failure_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.timeout {
                    inner.state = BreakerState::HalfOpen;
                    CallPermission::Probe
                } else {
                    CallPermission::Rejected
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Instant::now());
        if inner.state == BreakerState::HalfOpen || inner.consecutive_failures >= self.threshold {
            inner.state = BreakerState::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(50));
        assert_eq!(breaker.try_acquire(), CallPermission::Allowed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.try_acquire(), CallPermission::Allowed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.try_acquire(), CallPermission::Rejected);
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(breaker.try_acquire(), CallPermission::Probe);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn half_open_probe_failure_reopens_and_restarts_timer() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(breaker.try_acquire(), CallPermission::Probe);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.try_acquire(), CallPermission::Rejected);
    }

    #[test]
    fn remains_open_for_at_least_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        breaker.record_failure();
        assert_eq!(breaker.try_acquire(), CallPermission::Rejected);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(breaker.try_acquire(), CallPermission::Rejected);
    }
}
