//! Token bucket rate limiter
//!
//! One bucket guards each credential. The fill level is recomputed lazily from
//! elapsed monotonic time whenever the bucket is touched; there is no
//! background refill task.

use crate::error::ProviderError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Bucket State
// ============================================================================

#[derive(Debug)]
struct BucketState {
    /// Current fill, always within `0..=capacity`
    tokens: f64,
    last_refill_at: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * refill_rate).min(capacity);
        self.last_refill_at = now;
    }
}

// ============================================================================
// Token Bucket
// ============================================================================

/// Token bucket with lazy refill
///
/// `acquire` suspends the calling task until enough tokens have accumulated.
/// The state mutex is only held for the arithmetic, never across the sleep,
/// so callers of other buckets (and `try_acquire` on this one) never wait on
/// somebody else's backoff.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
    /// Reference point for `snapshot_at_nanos`
    epoch: Instant,
    /// Lock-free copy of the last observed fill (f64 bits)
    snapshot_tokens: AtomicU64,
    snapshot_at_nanos: AtomicU64,
}

impl TokenBucket {
    /// Create a full bucket
    ///
    /// `refill_rate` is in tokens per second; `capacity` is the burst size.
    /// Both must be finite and positive.
    pub fn new(refill_rate: f64, capacity: f64) -> Result<Self, ProviderError> {
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(ProviderError::invalid_request(format!(
                "refill rate must be a positive number, got {}",
                refill_rate
            )));
        }
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ProviderError::invalid_request(format!(
                "bucket capacity must be a positive number, got {}",
                capacity
            )));
        }

        let now = Instant::now();
        Ok(Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill_at: now,
            }),
            epoch: now,
            snapshot_tokens: AtomicU64::new(capacity.to_bits()),
            snapshot_at_nanos: AtomicU64::new(0),
        })
    }

    /// Create a bucket with the default two-second burst allowance
    pub fn with_rate(refill_rate: f64) -> Result<Self, ProviderError> {
        Self::new(refill_rate, refill_rate * 2.0)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Wait until `cost` tokens are available, take them, and return the wait
    pub async fn acquire(&self, cost: u32) -> Result<Duration, ProviderError> {
        let cost = self.check_cost(cost)?;
        let started = Instant::now();

        loop {
            let wait = match self.take_or_wait(cost) {
                Ok(()) => return Ok(started.elapsed()),
                Err(wait) => wait,
            };

            tracing::trace!(
                cost = cost,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate limiter tokens"
            );

            // Another caller may drain the refill while we sleep, so the loop
            // re-validates before deducting.
            tokio::time::sleep(wait).await;
        }
    }

    /// Take `cost` tokens only if they are already there
    pub fn try_acquire(&self, cost: u32) -> bool {
        let cost = f64::from(cost);
        if cost > self.capacity {
            return false;
        }
        self.take_or_wait(cost).is_ok()
    }

    /// Estimated fill right now
    ///
    /// Reads the last published snapshot without locking, so it may lag a
    /// concurrent deduction. Use for diagnostics and load-aware selection only.
    pub fn available(&self) -> f64 {
        let tokens = f64::from_bits(self.snapshot_tokens.load(Ordering::Relaxed));
        let at = self.epoch + Duration::from_nanos(self.snapshot_at_nanos.load(Ordering::Relaxed));
        let elapsed = Instant::now().saturating_duration_since(at);
        (tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity)
    }

    fn check_cost(&self, cost: u32) -> Result<f64, ProviderError> {
        let cost = f64::from(cost);
        if cost > self.capacity {
            return Err(ProviderError::invalid_request(format!(
                "requested {} tokens but bucket capacity is {}",
                cost, self.capacity
            )));
        }
        Ok(cost)
    }

    /// Refill, then either deduct or report how long until `cost` is covered
    fn take_or_wait(&self, cost: f64) -> Result<(), Duration> {
        let mut state = self.lock();
        let now = Instant::now();
        state.refill(now, self.capacity, self.refill_rate);

        let outcome = if state.tokens >= cost {
            state.tokens -= cost;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (cost - state.tokens) / self.refill_rate,
            ))
        };

        self.publish(&state);
        outcome
    }

    fn publish(&self, state: &BucketState) {
        let at = state.last_refill_at.saturating_duration_since(self.epoch);
        self.snapshot_tokens
            .store(state.tokens.to_bits(), Ordering::Relaxed);
        self.snapshot_at_nanos
            .store(at.as_nanos() as u64, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn tokens(&self) -> f64 {
        let mut state = self.lock();
        state.refill(Instant::now(), self.capacity, self.refill_rate);
        state.tokens
    }
}

// ============================================================================
// Tests
// ============================================================================
