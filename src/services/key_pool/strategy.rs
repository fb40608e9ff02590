//! Key selection strategies
//!
//! A strategy only picks among slots the pool already considers eligible. It
//! never blocks and never mutates slot state; claiming a half-open trial and
//! taking rate limiter tokens are the pool's job.

use super::credential::SlotView;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Picks one slot out of the eligible candidates
///
/// Candidates are passed in slot id order. Returning `None` means the
/// strategy declines every candidate; the built-in strategies only do so for
/// an empty list.
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn select<'a>(&self, candidates: &'a [SlotView]) -> Option<&'a SlotView>;
}

// ============================================================================
// Strategy Kind
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown selection strategy '{0}'")]
pub struct UnknownStrategy(pub String);

/// Configurable strategy name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Cycle through slots in id order (default)
    #[default]
    RoundRobin,
    /// Slot that was used longest ago, never-used first
    LeastRecentlyUsed,
    /// Slot with the most rate limiter tokens left
    LeastLoaded,
    /// Uniformly random slot
    Random,
    /// Lowest id first, next one only when it is unavailable
    Failover,
}

impl StrategyKind {
    pub fn build(self) -> Box<dyn SelectionStrategy> {
        match self {
            Self::RoundRobin => Box::new(RoundRobin::new()),
            Self::LeastRecentlyUsed => Box::new(LeastRecentlyUsed),
            Self::LeastLoaded => Box::new(LeastLoaded),
            Self::Random => Box::new(RandomChoice),
            Self::Failover => Box::new(Failover),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastRecentlyUsed => "least_recently_used",
            Self::LeastLoaded => "least_loaded",
            Self::Random => "random",
            Self::Failover => "failover",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" | "rr" => Ok(Self::RoundRobin),
            "least_recently_used" | "lru" => Ok(Self::LeastRecentlyUsed),
            "least_loaded" | "weighted" => Ok(Self::LeastLoaded),
            "random" => Ok(Self::Random),
            "failover" => Ok(Self::Failover),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Round robin keyed on slot id
///
/// The cursor remembers the id after the last pick rather than a position in
/// the candidate list, so the cycle stays in order when the eligible set
/// shrinks or grows between calls.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next_id: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select<'a>(&self, candidates: &'a [SlotView]) -> Option<&'a SlotView> {
        let first = candidates.first()?;
        let pick = |start: usize| {
            candidates
                .iter()
                .find(|c| c.id >= start)
                .unwrap_or(first)
        };

        // The closure never returns None, so both arms carry the previous cursor.
        let previous = match self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |start| {
                Some(pick(start).id + 1)
            }) {
            Ok(start) | Err(start) => start,
        };
        Some(pick(previous))
    }
}

#[derive(Debug, Default)]
pub struct LeastRecentlyUsed;

impl SelectionStrategy for LeastRecentlyUsed {
    fn name(&self) -> &'static str {
        "least_recently_used"
    }

    fn select<'a>(&self, candidates: &'a [SlotView]) -> Option<&'a SlotView> {
        // `None` sorts before any timestamp; ties go to the lowest id.
        candidates.iter().min_by_key(|c| c.last_used_at)
    }
}

#[derive(Debug, Default)]
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select<'a>(&self, candidates: &'a [SlotView]) -> Option<&'a SlotView> {
        candidates
            .iter()
            .min_by(|a, b| b.available_tokens.total_cmp(&a.available_tokens))
    }
}

#[derive(Debug, Default)]
pub struct RandomChoice;

impl SelectionStrategy for RandomChoice {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select<'a>(&self, candidates: &'a [SlotView]) -> Option<&'a SlotView> {
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        candidates.get(idx)
    }
}

#[derive(Debug, Default)]
pub struct Failover;

impl SelectionStrategy for Failover {
    fn name(&self) -> &'static str {
        "failover"
    }

    fn select<'a>(&self, candidates: &'a [SlotView]) -> Option<&'a SlotView> {
        candidates.first()
    }
}

// ============================================================================
// Tests
// ============================================================================
