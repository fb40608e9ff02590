//! Credentials and the per-credential slot
//!
//! A `CredentialSlot` bundles one API key with its rate limiter, circuit
//! breaker and metrics. Slots are created once with the pool and live as long
//! as it does; only the pool mutates them.

use super::circuit_breaker::{BreakerConfig, CircuitBreaker};
use super::metrics::KeyMetrics;
use super::rate_limiter::TokenBucket;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

// ============================================================================
// Credential
// ============================================================================

/// An API key and the name it is logged under
#[derive(Clone)]
pub struct Credential {
    name: String,
    api_key: String,
}

impl Credential {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
        }
    }

    /// Name keys `key_1`, `key_2`, ... in configuration order
    pub fn from_keys<I, S>(keys: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        keys.into_iter()
            .enumerate()
            .map(|(idx, key)| Self::new(format!("key_{}", idx + 1), key))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

// Keys never end up in logs or panic messages.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Credential Slot
// ============================================================================

#[derive(Debug)]
pub struct CredentialSlot {
    id: usize,
    credential: Credential,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    metrics: KeyMetrics,
    /// Last time the slot was handed out, for least-recently-used selection
    last_leased_at: Mutex<Option<Instant>>,
}

impl CredentialSlot {
    pub fn new(id: usize, credential: Credential, limiter: TokenBucket, breaker: BreakerConfig) -> Self {
        Self {
            id,
            credential,
            limiter,
            breaker: CircuitBreaker::new(breaker),
            metrics: KeyMetrics::new(),
            last_leased_at: Mutex::new(None),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        self.credential.name()
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &KeyMetrics {
        &self.metrics
    }

    /// Most recent of "handed out" and "finished an attempt"
    pub fn last_used_at(&self) -> Option<Instant> {
        let leased = *self
            .last_leased_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        leased.max(self.metrics.last_used_at())
    }

    pub(super) fn mark_leased(&self, now: Instant) {
        *self
            .last_leased_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    /// Selection-time view, or `None` if the breaker rejects traffic at `now`
    pub fn view(&self, now: Instant) -> Option<SlotView> {
        if !self.breaker.is_eligible(now) {
            return None;
        }
        Some(SlotView {
            id: self.id,
            trial: self.breaker.is_trial_candidate(),
            last_used_at: self.last_used_at(),
            available_tokens: self.limiter.available(),
        })
    }
}

/// What a selection strategy gets to see about an eligible slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotView {
    pub id: usize,
    /// Admission would be the half-open trial
    pub trial: bool,
    pub last_used_at: Option<Instant>,
    pub available_tokens: f64,
}

// ============================================================================
// Tests
// ============================================================================
