//! Multi-key pool
//!
//! This module spreads requests over several API keys for the same provider.
//! Every key gets its own token bucket, circuit breaker and usage metrics;
//! a pluggable strategy chooses among the keys that are currently allowed to
//! take traffic.
//!
//! # Example
//!
//! ```ignore
//! use genai_pool::services::key_pool::{KeyPool, PoolConfig, StrategyKind};
//!
//! let pool = KeyPool::from_keys(
//!     ["key-a", "key-b"],
//!     PoolConfig::new(1.0).with_strategy(StrategyKind::LeastRecentlyUsed),
//! )?;
//! let lease = pool.acquire_slot(None, None).await?;
//! lease.limiter().acquire(1).await?;
//! ```

mod circuit_breaker;
mod credential;
mod metrics;
mod pool;
mod rate_limiter;
mod strategy;

pub use circuit_breaker::{Admission, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitPhase};
pub use credential::{Credential, CredentialSlot, SlotView};
pub use metrics::{KeyMetrics, KeyMetricsSnapshot};
pub use pool::{AttemptOutcome, KeyPool, PoolConfig, PoolStats, SlotLease, SlotStats};
pub use rate_limiter::TokenBucket;
pub use strategy::{
    Failover, LeastLoaded, LeastRecentlyUsed, RandomChoice, RoundRobin, SelectionStrategy,
    StrategyKind, UnknownStrategy,
};
