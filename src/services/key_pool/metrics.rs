//! Per-credential usage metrics

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct LastAttempt {
    error_kind: Option<ErrorKind>,
    latency: Option<Duration>,
    used_at: Option<Instant>,
    used_at_wall: Option<DateTime<Utc>>,
}

/// Counters and last-attempt details for one credential
///
/// Written once per completed attempt by the pool; never fails.
#[derive(Debug, Default)]
pub struct KeyMetrics {
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    last: Mutex<LastAttempt>,
}

impl KeyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency: Duration) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.touch(latency);
    }

    pub fn record_failure(&self, kind: ErrorKind, latency: Duration) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut last = self.touch(latency);
        last.error_kind = Some(kind);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn last_used_at(&self) -> Option<Instant> {
        self.lock().used_at
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.lock().error_kind
    }

    pub fn snapshot(&self) -> KeyMetricsSnapshot {
        let last = self.lock();
        KeyMetricsSnapshot {
            total_requests: self.total_requests(),
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
            last_error_kind: last.error_kind,
            last_latency_ms: last.latency.map(|l| l.as_millis() as u64),
            last_used_at: last.used_at_wall,
        }
    }

    fn touch(&self, latency: Duration) -> MutexGuard<'_, LastAttempt> {
        let mut last = self.lock();
        last.latency = Some(latency);
        last.used_at = Some(Instant::now());
        last.used_at_wall = Some(Utc::now());
        last
    }

    fn lock(&self) -> MutexGuard<'_, LastAttempt> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializable copy of a credential's metrics
#[derive(Debug, Clone, Serialize)]
pub struct KeyMetricsSnapshot {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error_kind: Option<ErrorKind>,
    pub last_latency_ms: Option<u64>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_each_attempt_once() {
        let metrics = KeyMetrics::new();

        metrics.record_success(Duration::from_millis(120));
        metrics.record_failure(ErrorKind::ServerError, Duration::from_millis(40));
        metrics.record_failure(ErrorKind::Timeout, Duration::from_millis(900));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.total_successes, 1);
        assert_eq!(snap.total_failures, 2);
        assert_eq!(snap.last_error_kind, Some(ErrorKind::Timeout));
        assert_eq!(snap.last_latency_ms, Some(900));
        assert!(snap.last_used_at.is_some());
    }

    #[test]
    fn test_success_keeps_last_error_kind() {
        let metrics = KeyMetrics::new();
        metrics.record_failure(ErrorKind::RateLimitExceeded, Duration::from_millis(5));
        metrics.record_success(Duration::from_millis(10));

        assert_eq!(metrics.last_error_kind(), Some(ErrorKind::RateLimitExceeded));
        assert_eq!(metrics.snapshot().last_latency_ms, Some(10));
    }

    #[test]
    fn test_fresh_metrics_are_empty() {
        let metrics = KeyMetrics::new();
        assert_eq!(metrics.total_requests(), 0);
        assert!(metrics.last_used_at().is_none());
        assert!(metrics.snapshot().last_used_at.is_none());
    }
}
