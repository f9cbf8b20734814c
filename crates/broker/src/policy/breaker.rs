// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sliding-window circuit breaker for backend restart loops.
//!
//! Failures are stored as timestamps in a bounded ring and counted against
//! `now - window`; old failures age out instead of accumulating forever.
//! State machine: closed → open at the failure threshold, open → half-open
//! after the recovery time, half-open → closed after enough consecutive
//! successes (any failure reopens).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub window: Duration,
    pub recovery_time: Duration,
    pub success_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            recovery_time: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// The breaker itself. The owner serializes access; no interior locking.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: usize,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            half_open_successes: 0,
        }
    }

    /// Whether a call may proceed. In the open state this transitions to
    /// half-open once the recovery time has elapsed.
    pub fn can_execute(&mut self) -> bool {
        self.can_execute_at(Instant::now())
    }

    pub fn can_execute_at(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed_ok = self
                    .opened_at
                    .is_some_and(|t| now.saturating_duration_since(t) >= self.config.recovery_time);
                if elapsed_ok {
                    self.state = BreakerState::HalfOpen;
                    self.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.success_threshold {
                    self.reset_closed();
                }
            }
            BreakerState::Closed => {}
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        match self.state {
            BreakerState::HalfOpen => {
                self.open(now);
            }
            BreakerState::Closed => {
                self.failures.push_back(now);
                self.expire(now);
                while self.failures.len() > self.config.failure_threshold {
                    self.failures.pop_front();
                }
                if self.failures.len() >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            BreakerState::Open => {
                self.failures.push_back(now);
                self.expire(now);
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Failures still inside the sliding window.
    pub fn failure_count(&self) -> usize {
        let now = Instant::now();
        self.failures
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.config.window)
            .count()
    }

    pub fn force_reset(&mut self) {
        self.reset_closed();
    }

    fn open(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
    }

    fn reset_closed(&mut self) {
        self.state = BreakerState::Closed;
        self.failures.clear();
        self.opened_at = None;
        self.half_open_successes = 0;
    }

    /// Drop failures older than the window.
    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.failures.front() {
            if now.saturating_duration_since(*front) >= self.config.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
