//! Key Pool Implementation
//!
//! The `KeyPool` owns one `CredentialSlot` per API key and hands out leases on
//! them. Each slot locks its own limiter, breaker and metrics independently;
//! the pool itself holds no lock across slots.

use super::circuit_breaker::{Admission, BreakerConfig, BreakerSnapshot, CircuitPhase};
use super::credential::{Credential, CredentialSlot, SlotView};
use super::metrics::KeyMetricsSnapshot;
use super::rate_limiter::TokenBucket;
use super::strategy::{SelectionStrategy, StrategyKind};
use crate::error::{BreakerEffect, ErrorKind, ProviderError};
use crate::utils::timeout::earliest;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Configuration for key pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Sustained requests per second allowed on each key
    pub qps_per_key: f64,
    /// Bucket capacity as a multiple of `qps_per_key`
    pub burst_multiplier: f64,
    pub breaker: BreakerConfig,
    pub strategy: StrategyKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            qps_per_key: 1.0,
            burst_multiplier: 2.0,
            breaker: BreakerConfig::default(),
            strategy: StrategyKind::RoundRobin,
        }
    }
}

impl PoolConfig {
    pub fn new(qps_per_key: f64) -> Self {
        Self {
            qps_per_key,
            ..Default::default()
        }
    }

    pub fn with_burst_multiplier(mut self, multiplier: f64) -> Self {
        self.burst_multiplier = multiplier;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn capacity(&self) -> f64 {
        self.qps_per_key * self.burst_multiplier
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if !self.qps_per_key.is_finite() || self.qps_per_key <= 0.0 {
            return Err(ProviderError::invalid_request(format!(
                "qps_per_key must be a positive number, got {}",
                self.qps_per_key
            )));
        }
        if !self.capacity().is_finite() || self.capacity() < 1.0 {
            return Err(ProviderError::invalid_request(format!(
                "bucket capacity must hold at least one token, got {}",
                self.capacity()
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ProviderError::invalid_request(
                "failure_threshold must be at least 1",
            ));
        }
        if !self.breaker.cooldown_growth.is_finite() || self.breaker.cooldown_growth < 1.0 {
            return Err(ProviderError::invalid_request(
                "cooldown_growth must be at least 1.0",
            ));
        }
        if self.breaker.max_cooldown < self.breaker.cooldown {
            return Err(ProviderError::invalid_request(
                "max_cooldown must not be shorter than cooldown",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Leases and Outcomes
// ============================================================================

/// How a dispatched attempt ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttemptOutcome {
    Success { latency: Duration },
    Failure { kind: ErrorKind, latency: Duration },
}

/// Permission to send one request on a slot
///
/// Hand it back through `KeyPool::record_outcome` once the transport has
/// answered. A lease dropped without an outcome (deadline hit while waiting
/// for tokens, caller cancelled) gives a claimed half-open trial back without
/// touching the breaker or the metrics.
#[derive(Debug)]
pub struct SlotLease {
    slot: Arc<CredentialSlot>,
    trial: bool,
    settled: bool,
    freed: Arc<Notify>,
}

impl SlotLease {
    pub fn slot(&self) -> &CredentialSlot {
        &self.slot
    }

    pub fn id(&self) -> usize {
        self.slot.id()
    }

    pub fn name(&self) -> &str {
        self.slot.name()
    }

    pub fn credential(&self) -> &Credential {
        self.slot.credential()
    }

    pub fn limiter(&self) -> &TokenBucket {
        self.slot.limiter()
    }

    /// Whether this lease carries the breaker's half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        if self.slot.breaker().release_trial() {
            tracing::debug!(credential = %self.slot.name(), "Released unused half-open trial");
            self.freed.notify_waiters();
        }
    }
}

// ============================================================================
// Key Pool
// ============================================================================

#[derive(Debug)]
pub struct KeyPool {
    slots: Vec<Arc<CredentialSlot>>,
    strategy: Box<dyn SelectionStrategy>,
    config: PoolConfig,
    /// Signalled when a slot becomes usable again before its cooldown
    slot_freed: Arc<Notify>,
}

impl KeyPool {
    /// Create a pool using the strategy named in `config`
    pub fn new(credentials: Vec<Credential>, config: PoolConfig) -> Result<Self, ProviderError> {
        let strategy = config.strategy.build();
        Self::with_strategy(credentials, config, strategy)
    }

    /// Create a pool from bare keys, named `key_1`, `key_2`, ...
    pub fn from_keys<I, S>(keys: I, config: PoolConfig) -> Result<Self, ProviderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Credential::from_keys(keys), config)
    }

    /// Create a pool with a custom selection strategy
    pub fn with_strategy(
        credentials: Vec<Credential>,
        config: PoolConfig,
        strategy: Box<dyn SelectionStrategy>,
    ) -> Result<Self, ProviderError> {
        if credentials.is_empty() {
            return Err(ProviderError::invalid_request(
                "key pool needs at least one credential",
            ));
        }
        config.validate()?;

        let slots = credentials
            .into_iter()
            .enumerate()
            .map(|(id, credential)| -> Result<Arc<CredentialSlot>, ProviderError> {
                let limiter = TokenBucket::new(config.qps_per_key, config.capacity())?;
                Ok(Arc::new(CredentialSlot::new(
                    id,
                    credential,
                    limiter,
                    config.breaker.clone(),
                )))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            keys = slots.len(),
            strategy = strategy.name(),
            qps_per_key = config.qps_per_key,
            burst = config.capacity(),
            failure_threshold = config.breaker.failure_threshold,
            cooldown_secs = config.breaker.cooldown.as_secs_f64(),
            "Key pool initialized"
        );

        Ok(Self {
            slots,
            strategy,
            config,
            slot_freed: Arc::new(Notify::new()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, id: usize) -> Option<&CredentialSlot> {
        self.slots.get(id).map(Arc::as_ref)
    }

    /// Pick a slot without waiting
    ///
    /// `avoid` is skipped whenever another slot is eligible. A candidate whose
    /// breaker refuses admission (another caller won its trial in the
    /// meantime) is dropped and selection runs again on the rest.
    pub fn try_select(&self, avoid: Option<usize>) -> Option<SlotLease> {
        let now = Instant::now();
        let mut candidates: Vec<SlotView> =
            self.slots.iter().filter_map(|slot| slot.view(now)).collect();

        if let Some(avoid) = avoid {
            if candidates.iter().any(|c| c.id != avoid) {
                candidates.retain(|c| c.id != avoid);
            }
        }

        loop {
            let chosen = self.strategy.select(&candidates)?.id;
            let slot = self.slots.get(chosen)?;

            match slot.breaker().try_admit(now) {
                Admission::Closed => return Some(self.lease(slot, false, now)),
                Admission::Trial => {
                    tracing::info!(credential = %slot.name(), "Admitting half-open trial request");
                    return Some(self.lease(slot, true, now));
                }
                Admission::Rejected => {
                    candidates.retain(|c| c.id != chosen);
                    if candidates.is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    /// Pick a slot, waiting for a cooldown to end if every key is open
    ///
    /// The wait ends at the earliest cooldown expiry, at `deadline`, or when
    /// another caller frees a slot, whichever comes first. Selection is then
    /// retried once before giving up with `PoolExhausted`.
    pub async fn acquire_slot(
        &self,
        avoid: Option<usize>,
        deadline: Option<Instant>,
    ) -> Result<SlotLease, ProviderError> {
        let notified = self.slot_freed.notified();
        tokio::pin!(notified);

        if let Some(lease) = self.try_select(avoid) {
            return Ok(lease);
        }

        if let Some(wake_at) = earliest(self.earliest_ready_at(), deadline) {
            tracing::debug!(
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "No eligible key, waiting for a cooldown to end"
            );
            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = &mut notified => {}
            }

            if let Some(lease) = self.try_select(avoid) {
                return Ok(lease);
            }
        }

        let retry_after = self
            .earliest_ready_at()
            .map(|ready| ready.saturating_duration_since(Instant::now()));
        tracing::warn!(
            keys = self.slots.len(),
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "Key pool exhausted"
        );
        Err(ProviderError::pool_exhausted(retry_after))
    }

    /// Feed the result of a dispatched attempt back into the slot
    pub fn record_outcome(&self, mut lease: SlotLease, outcome: AttemptOutcome) {
        lease.settled = true;
        let slot = &lease.slot;

        match outcome {
            AttemptOutcome::Success { latency } => {
                slot.metrics().record_success(latency);
                if slot.breaker().record_success(lease.trial) {
                    tracing::info!(credential = %slot.name(), "Credential recovered, circuit closed");
                    self.slot_freed.notify_waiters();
                }
            }
            AttemptOutcome::Failure { kind, latency } => {
                slot.metrics().record_failure(kind, latency);
                let effect = kind.breaker_effect();
                let opened = slot
                    .breaker()
                    .record_failure(effect, lease.trial, Instant::now());

                if opened {
                    let snapshot = slot.breaker().snapshot(Instant::now());
                    tracing::warn!(
                        credential = %slot.name(),
                        kind = %kind,
                        failures = snapshot.consecutive_failures,
                        cooldown_ms = snapshot.cooldown_ms,
                        "Circuit opened for credential"
                    );
                } else if effect == BreakerEffect::None && lease.trial {
                    self.slot_freed.notify_waiters();
                }
            }
        }
    }

    /// Whether some slot other than `id` could take a request right now
    pub fn has_eligible_except(&self, id: usize) -> bool {
        let now = Instant::now();
        self.slots
            .iter()
            .any(|slot| slot.id() != id && slot.breaker().is_eligible(now))
    }

    /// Earliest moment an open breaker will accept a trial
    pub fn earliest_ready_at(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|slot| slot.breaker().ready_at())
            .min()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let slots: Vec<SlotStats> = self
            .slots
            .iter()
            .map(|slot| SlotStats {
                id: slot.id(),
                name: slot.name().to_string(),
                eligible: slot.breaker().is_eligible(now),
                available_tokens: slot.limiter().available(),
                capacity: slot.limiter().capacity(),
                breaker: slot.breaker().snapshot(now),
                metrics: slot.metrics().snapshot(),
            })
            .collect();

        let count = |phase: CircuitPhase| slots.iter().filter(|s| s.breaker.phase == phase).count();
        PoolStats {
            total: slots.len(),
            eligible: slots.iter().filter(|s| s.eligible).count(),
            open: count(CircuitPhase::Open),
            half_open: count(CircuitPhase::HalfOpen),
            strategy: self.strategy.name().to_string(),
            slots,
        }
    }

    fn lease(&self, slot: &Arc<CredentialSlot>, trial: bool, now: Instant) -> SlotLease {
        slot.mark_leased(now);
        SlotLease {
            slot: Arc::clone(slot),
            trial,
            settled: false,
            freed: Arc::clone(&self.slot_freed),
        }
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Point-in-time view of one slot
#[derive(Debug, Clone, Serialize)]
pub struct SlotStats {
    pub id: usize,
    pub name: String,
    pub eligible: bool,
    pub available_tokens: f64,
    pub capacity: f64,
    #[serde(flatten)]
    pub breaker: BreakerSnapshot,
    #[serde(flatten)]
    pub metrics: KeyMetricsSnapshot,
}

/// Statistics about a key pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Total number of keys
    pub total: usize,
    /// Keys that could take a request right now
    pub eligible: usize,
    pub open: usize,
    pub half_open: usize,
    pub strategy: String,
    pub slots: Vec<SlotStats>,
}

impl PoolStats {
    /// Check if the pool is healthy (at least one key available)
    pub fn is_healthy(&self) -> bool {
        self.eligible > 0
    }

    pub fn total_requests(&self) -> u64 {
        self.slots.iter().map(|s| s.metrics.total_requests).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    const MS: Duration = Duration::from_millis(1);

    fn pool(keys: usize, threshold: u32, cooldown: Duration, strategy: StrategyKind) -> KeyPool {
        let config = PoolConfig::new(10.0)
            .with_breaker(BreakerConfig::new(threshold, cooldown))
            .with_strategy(strategy);
        KeyPool::from_keys((0..keys).map(|i| format!("secret-{}", i)), config).unwrap()
    }

    fn fail(pool: &KeyPool, lease: SlotLease, kind: ErrorKind) {
        pool.record_outcome(lease, AttemptOutcome::Failure { kind, latency: MS });
    }

    fn open_all(pool: &KeyPool) {
        for id in 0..pool.len() {
            let lease = pool.try_select(None).unwrap();
            assert_eq!(lease.id(), id);
            fail(pool, lease, ErrorKind::Authentication);
        }
    }

    #[test]
    fn test_pool_config_validation() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::new(0.0).validate().is_err());
        assert!(PoolConfig::new(f64::NAN).validate().is_err());
        // 0.25 qps with the default multiplier cannot hold a single token
        assert!(PoolConfig::new(0.25).validate().is_err());
        assert!(PoolConfig::new(0.25).with_burst_multiplier(4.0).validate().is_ok());
        assert!(PoolConfig::default()
            .with_breaker(BreakerConfig::new(0, Duration::from_secs(1)))
            .validate()
            .is_err());
        assert!(PoolConfig::default()
            .with_breaker(BreakerConfig::default().with_growth(0.5))
            .validate()
            .is_err());
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let err = KeyPool::new(Vec::new(), PoolConfig::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_key_is_skipped_until_cooldown() {
        let pool = pool(3, 3, Duration::from_secs(30), StrategyKind::RoundRobin);

        // Key 0 fails three times in a row while 1 and 2 keep succeeding
        for _ in 0..3 {
            for expected in 0..3 {
                let lease = pool.try_select(None).unwrap();
                assert_eq!(lease.id(), expected);
                if expected == 0 {
                    fail(&pool, lease, ErrorKind::ServerError);
                } else {
                    pool.record_outcome(lease, AttemptOutcome::Success { latency: MS });
                }
            }
        }
        assert_eq!(pool.slot(0).unwrap().breaker().phase(), CircuitPhase::Open);
        assert!(pool.has_eligible_except(0));

        for _ in 0..30 {
            let lease = pool.try_select(None).unwrap();
            assert_ne!(lease.id(), 0);
            pool.record_outcome(lease, AttemptOutcome::Success { latency: MS });
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        let picked: Vec<usize> = (0..3).map(|_| pool.try_select(None).unwrap().id()).collect();
        assert!(picked.contains(&0), "picked {:?}", picked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_open_exhausts_at_deadline() {
        let pool = pool(3, 1, Duration::from_secs(60), StrategyKind::RoundRobin);
        open_all(&pool);

        let started = Instant::now();
        let err = pool
            .acquire_slot(None, Some(started + Duration::from_secs(2)))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::PoolExhausted);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(2010), "waited {:?}", waited);
        // Authentication failures open with the long cooldown
        let retry_after = err.retry_after.unwrap();
        assert!(retry_after > Duration::from_secs(500), "{:?}", retry_after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_waits_for_cooldown() {
        let pool = pool(2, 1, Duration::from_secs(1), StrategyKind::RoundRobin);
        for _ in 0..2 {
            let lease = pool.try_select(None).unwrap();
            fail(&pool, lease, ErrorKind::Timeout);
        }

        let started = Instant::now();
        let lease = pool.acquire_slot(None, None).await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(1010), "waited {:?}", waited);
        assert!(lease.is_trial());

        pool.record_outcome(lease, AttemptOutcome::Success { latency: MS });
        assert_eq!(pool.stats().open, 1);
        assert_eq!(pool.stats().eligible, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_cooldown() {
        let pool = pool(1, 1, Duration::from_secs(5), StrategyKind::RoundRobin);
        let lease = pool.try_select(None).unwrap();
        fail(&pool, lease, ErrorKind::ServerError);

        tokio::time::advance(Duration::from_secs(5)).await;

        let leases: Vec<Option<SlotLease>> = (0..10).map(|_| pool.try_select(None)).collect();
        let trials: Vec<&SlotLease> = leases.iter().flatten().collect();
        assert_eq!(trials.len(), 1);
        assert!(trials[0].is_trial());
        assert_eq!(pool.stats().half_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let pool = pool(1, 1, Duration::from_secs(5), StrategyKind::RoundRobin);
        let lease = pool.try_select(None).unwrap();
        fail(&pool, lease, ErrorKind::ServerError);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = pool.try_select(None).unwrap();
        fail(&pool, trial, ErrorKind::RateLimitExceeded);

        assert!(pool.try_select(None).is_none());
        assert_eq!(pool.slot(0).unwrap().breaker().phase(), CircuitPhase::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_request_cannot_free_trial_in_flight() {
        let pool = pool(1, 1, Duration::from_secs(5), StrategyKind::RoundRobin);
        let early = pool.try_select(None).unwrap();
        let failing = pool.try_select(None).unwrap();
        fail(&pool, failing, ErrorKind::ServerError);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = pool.try_select(None).unwrap();
        assert!(trial.is_trial());
        assert!(!early.is_trial());

        // The request leased while closed comes back during the trial
        fail(&pool, early, ErrorKind::ServiceUnavailable);
        assert!(pool.try_select(None).is_none());

        pool.record_outcome(trial, AttemptOutcome::Success { latency: MS });
        assert_eq!(pool.slot(0).unwrap().breaker().phase(), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_half_open() {
        let pool = pool(1, 1, Duration::from_secs(5), StrategyKind::RoundRobin);
        let early = pool.try_select(None).unwrap();
        let failing = pool.try_select(None).unwrap();
        fail(&pool, failing, ErrorKind::ServerError);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = pool.try_select(None).unwrap();
        pool.record_outcome(early, AttemptOutcome::Success { latency: MS });
        assert_eq!(pool.slot(0).unwrap().breaker().phase(), CircuitPhase::HalfOpen);
        assert!(pool.try_select(None).is_none());

        fail(&pool, trial, ErrorKind::ServerError);
        assert_eq!(pool.slot(0).unwrap().breaker().phase(), CircuitPhase::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_wakes_waiter() {
        let pool = Arc::new(pool(1, 1, Duration::from_secs(5), StrategyKind::RoundRobin));
        let lease = pool.try_select(None).unwrap();
        fail(&pool, lease, ErrorKind::ServerError);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = pool.try_select(None).unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let lease = pool
                    .acquire_slot(None, Some(Instant::now() + Duration::from_secs(10)))
                    .await;
                (lease.map(|l| l.is_trial()), started.elapsed())
            })
        };
        tokio::task::yield_now().await;

        // Abandoned before dispatch: no breaker or metrics effect
        drop(trial);

        let (got_trial, waited) = waiter.await.unwrap();
        assert_eq!(got_trial, Ok(true));
        assert!(waited < Duration::from_secs(1), "waited {:?}", waited);
        assert_eq!(pool.stats().total_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_gets_one_trial() {
        let pool = pool(1, 1, Duration::from_secs(1), StrategyKind::RoundRobin);
        let lease = pool.try_select(None).unwrap();
        fail(&pool, lease, ErrorKind::ServerError);

        let deadline = Instant::now() + Duration::from_millis(1500);
        let results = join_all((0..8).map(|_| pool.acquire_slot(None, Some(deadline)))).await;

        let granted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(granted, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.kind, ErrorKind::PoolExhausted);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_avoided_slot_used_only_as_last_resort() {
        let pool = pool(2, 1, Duration::from_secs(30), StrategyKind::Failover);

        assert_eq!(pool.try_select(Some(0)).unwrap().id(), 1);
        assert_eq!(pool.try_select(None).unwrap().id(), 0);

        let lease = pool.try_select(Some(0)).unwrap();
        fail(&pool, lease, ErrorKind::Location);
        assert!(!pool.has_eligible_except(0));
        assert_eq!(pool.try_select(Some(0)).unwrap().id(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_unavailable_leaves_breaker_alone() {
        let pool = pool(1, 2, Duration::from_secs(30), StrategyKind::RoundRobin);

        for _ in 0..5 {
            let lease = pool.try_select(None).unwrap();
            fail(&pool, lease, ErrorKind::ServiceUnavailable);
        }

        let slot = pool.slot(0).unwrap();
        assert_eq!(slot.breaker().consecutive_failures(), 0);
        assert_eq!(slot.breaker().phase(), CircuitPhase::Closed);
        assert_eq!(slot.metrics().total_failures(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_snapshot() {
        let pool = pool(2, 1, Duration::from_secs(30), StrategyKind::RoundRobin);
        let lease = pool.try_select(None).unwrap();
        pool.record_outcome(lease, AttemptOutcome::Success { latency: Duration::from_millis(42) });
        let lease = pool.try_select(None).unwrap();
        fail(&pool, lease, ErrorKind::Validation);

        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.eligible, 1);
        assert_eq!(stats.open, 1);
        assert!(stats.is_healthy());
        assert_eq!(stats.total_requests(), 2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["strategy"], "round_robin");
        assert_eq!(json["slots"][0]["name"], "key_1");
        assert_eq!(json["slots"][0]["last_latency_ms"], 42);
        assert_eq!(json["slots"][1]["phase"], "open");
        assert_eq!(json["slots"][1]["last_error_kind"], "validation");
        assert!(!json.to_string().contains("secret-"));
    }
}
