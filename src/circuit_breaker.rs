//! # Circuit Breaker Module
//!
//! Guards the LLM endpoint. After `circuit_breaker_threshold` consecutive
//! failures the breaker opens and calls fail fast, the classifier falls back
//! to its defaults, and users keep getting answers while the endpoint is down.
//! Once `circuit_breaker_reset_secs` have passed a single trial call is let
//! through; its outcome closes or re-opens the breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RecoveryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::default()),
            threshold: config.circuit_breaker_threshold.max(1),
            reset_after: Duration::from_secs(config.circuit_breaker_reset_secs),
        }
    }

    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        Self::state_of(&inner, self.reset_after)
    }

    fn state_of(inner: &BreakerInner, reset_after: Duration) -> BreakerState {
        match inner.opened_at {
            None => BreakerState::Closed,
            Some(opened) if opened.elapsed() >= reset_after => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// Ask permission to make a call. In half-open state only one caller wins.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match Self::state_of(&inner, self.reset_after) {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner::default();
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;
        if inner.consecutive_failures >= self.threshold {
            inner.opened_at = Some(Instant::now());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned lock only means another thread panicked mid-update of plain counters
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
