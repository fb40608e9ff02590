//! Per-credential circuit breaker
//!
//! Closed → Open after `failure_threshold` consecutive key-scoped failures.
//! Open → HalfOpen lazily, when a selection attempt finds the cooldown has
//! elapsed; the caller that performs the transition owns the single trial.
//! HalfOpen → Closed on a successful trial, back to Open on a failed one.

use crate::error::BreakerEffect;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Configuration
// ============================================================================

/// Breaker thresholds and cooldown policy
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive key-scoped failures that open the breaker
    pub failure_threshold: u32,
    /// Cooldown after the first trip
    pub cooldown: Duration,
    /// Upper bound for grown cooldowns, also used for hard trips
    pub max_cooldown: Duration,
    /// Factor applied to the cooldown each time a trial fails (1.0 keeps it fixed)
    pub cooldown_growth: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            max_cooldown: Duration::from_secs(600),
            cooldown_growth: 1.0,
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            max_cooldown: cooldown.max(BreakerConfig::default().max_cooldown),
            ..Default::default()
        }
    }

    pub fn with_max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown = max_cooldown;
        self
    }

    pub fn with_growth(mut self, growth: f64) -> Self {
        self.cooldown_growth = growth;
        self
    }

    fn grow(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.cooldown_growth;
        Duration::from_secs_f64(grown.min(self.max_cooldown.as_secs_f64()))
    }
}

// ============================================================================
// State
// ============================================================================

/// Breaker phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Result of asking the breaker for permission to send a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal traffic
    Closed,
    /// The caller now owns the half-open trial
    Trial,
    /// Open, or a trial is already in flight
    Rejected,
}

#[derive(Debug)]
struct BreakerState {
    phase: CircuitPhase,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trial_in_flight: bool,
}

impl BreakerState {
    fn trial_due(&self, now: Instant) -> bool {
        match self.phase {
            CircuitPhase::Closed => false,
            CircuitPhase::Open => self
                .opened_at
                .map_or(true, |opened| now >= opened + self.cooldown),
            CircuitPhase::HalfOpen => !self.trial_in_flight,
        }
    }

    fn trip(&mut self, now: Instant, cooldown: Duration) {
        self.phase = CircuitPhase::Open;
        self.opened_at = Some(now);
        self.cooldown = cooldown;
        self.trial_in_flight = false;
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub cooldown_ms: u64,
    /// Time left before a trial may be attempted, when open
    pub retry_in_ms: Option<u64>,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let cooldown = config.cooldown;
        Self {
            config,
            state: Mutex::new(BreakerState {
                phase: CircuitPhase::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown,
                trial_in_flight: false,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn phase(&self) -> CircuitPhase {
        self.lock().phase
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Whether a selection attempt at `now` could be admitted
    ///
    /// Does not claim anything; `try_admit` makes the decision stick.
    pub fn is_eligible(&self, now: Instant) -> bool {
        let state = self.lock();
        state.phase == CircuitPhase::Closed || state.trial_due(now)
    }

    /// Whether the next admission would be a half-open trial
    pub fn is_trial_candidate(&self) -> bool {
        self.lock().phase != CircuitPhase::Closed
    }

    /// When an open breaker will accept a trial
    pub fn ready_at(&self) -> Option<Instant> {
        let state = self.lock();
        match state.phase {
            CircuitPhase::Open => state.opened_at.map(|opened| opened + state.cooldown),
            _ => None,
        }
    }

    /// Ask to send a request at `now`
    ///
    /// The state mutex makes the Open → HalfOpen transition linearizable:
    /// exactly one caller per cooldown period gets `Admission::Trial`.
    pub fn try_admit(&self, now: Instant) -> Admission {
        let mut state = self.lock();
        let phase = state.phase;
        match phase {
            CircuitPhase::Closed => Admission::Closed,
            CircuitPhase::Open | CircuitPhase::HalfOpen if state.trial_due(now) => {
                state.phase = CircuitPhase::HalfOpen;
                state.trial_in_flight = true;
                Admission::Trial
            }
            _ => Admission::Rejected,
        }
    }

    /// Record a success; returns true if this closed a half-open breaker
    ///
    /// `trial` tells whether the request held the half-open trial. While half
    /// open, only the trial's own outcome may close the breaker.
    pub fn record_success(&self, trial: bool) -> bool {
        let mut state = self.lock();
        let phase = state.phase;
        match phase {
            CircuitPhase::Closed => {
                state.consecutive_failures = 0;
                false
            }
            CircuitPhase::HalfOpen if trial => {
                state.phase = CircuitPhase::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.cooldown = self.config.cooldown;
                state.trial_in_flight = false;
                true
            }
            // A request admitted before the trip finished late; the breaker
            // keeps waiting for its own trial.
            CircuitPhase::HalfOpen | CircuitPhase::Open => false,
        }
    }

    /// Record a failure; returns true if the breaker (re)opened
    ///
    /// Late failures from requests admitted before the trip only bump the
    /// failure counter while half open; the trial alone settles that phase.
    pub fn record_failure(&self, effect: BreakerEffect, trial: bool, now: Instant) -> bool {
        let mut state = self.lock();
        let phase = state.phase;

        if effect != BreakerEffect::None {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }
        let failures = state.consecutive_failures;

        match (effect, phase) {
            (BreakerEffect::None, CircuitPhase::HalfOpen) if trial => {
                // An inconclusive trial hands the slot back to the next caller.
                state.trial_in_flight = false;
                false
            }
            (BreakerEffect::None, _) => false,
            (_, CircuitPhase::HalfOpen) if !trial => false,
            (BreakerEffect::Trip, _) => {
                state.trip(now, self.config.max_cooldown);
                true
            }
            (BreakerEffect::Count, CircuitPhase::Closed)
                if failures >= self.config.failure_threshold =>
            {
                state.trip(now, self.config.cooldown);
                true
            }
            (BreakerEffect::Count, CircuitPhase::HalfOpen) => {
                let cooldown = self.config.grow(state.cooldown);
                state.trip(now, cooldown);
                true
            }
            (BreakerEffect::Count, _) => false,
        }
    }

    /// Give back a trial that was claimed but never dispatched
    ///
    /// Returns true if a trial was actually released.
    pub fn release_trial(&self) -> bool {
        let mut state = self.lock();
        if state.phase == CircuitPhase::HalfOpen && state.trial_in_flight {
            state.trial_in_flight = false;
            return true;
        }
        false
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let state = self.lock();
        let retry_in_ms = match (state.phase, state.opened_at) {
            (CircuitPhase::Open, Some(opened)) => Some(
                (opened + state.cooldown)
                    .saturating_duration_since(now)
                    .as_millis() as u64,
            ),
            _ => None,
        };
        BreakerSnapshot {
            phase: state.phase,
            consecutive_failures: state.consecutive_failures,
            cooldown_ms: state.cooldown.as_millis() as u64,
            retry_in_ms,
        }
    }

    /// Put the breaker back to closed, e.g. after a key was rotated by an operator
    pub fn reset(&self) {
        let mut state = self.lock();
        state.phase = CircuitPhase::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.cooldown = self.config.cooldown;
        state.trial_in_flight = false;
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================
