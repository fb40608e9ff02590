//! Provider error types
//!
//! Every failure the pool can surface is a `ProviderError`: a kind tag plus the
//! status code and retry-after hint the provider gave us, if any. Retry and
//! circuit breaker decisions are made by matching on `ErrorKind`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Kind
// ============================================================================

/// Classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Per-key quota or rate limit exhausted (HTTP 429)
    RateLimitExceeded,
    /// Provider 5xx attributable to the request or key
    ServerError,
    /// Provider-wide overload, not tied to any key
    ServiceUnavailable,
    /// The attempt did not finish before its deadline
    Timeout,
    /// Malformed request or unusable response
    Validation,
    /// The key was rejected
    Authentication,
    /// Network or region restriction on the key
    Location,
    /// Offline mode is enabled; no network call was made
    Offline,
    /// No credential could be selected before the deadline
    PoolExhausted,
    /// The caller asked for something that can never succeed
    InvalidRequest,
}

/// What a failure does to the circuit breaker of the key that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEffect {
    /// Leave the breaker untouched
    None,
    /// Count towards the failure threshold
    Count,
    /// Open the breaker immediately, bypassing the threshold
    Trip,
}

impl ErrorKind {
    /// Whether the pool client may retry after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded
                | Self::ServerError
                | Self::ServiceUnavailable
                | Self::Timeout
                | Self::PoolExhausted
        )
    }

    /// Breaker effect for a failure of this kind on a single key
    pub fn breaker_effect(&self) -> BreakerEffect {
        match self {
            Self::RateLimitExceeded | Self::ServerError | Self::Timeout | Self::Validation => {
                BreakerEffect::Count
            }
            Self::Authentication | Self::Location => BreakerEffect::Trip,
            Self::ServiceUnavailable | Self::Offline | Self::PoolExhausted | Self::InvalidRequest => {
                BreakerEffect::None
            }
        }
    }

    /// Whether the failure is attributable to the key that served the attempt
    pub fn is_key_scoped(&self) -> bool {
        self.breaker_effect() != BreakerEffect::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::ServerError => "server_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Location => "location",
            Self::Offline => "offline",
            Self::PoolExhausted => "pool_exhausted",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Provider Error
// ============================================================================

/// A classified failure, carrying the provider's metadata unchanged
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status returned by the provider, when there was a response
    pub status_code: Option<u16>,
    /// How long the provider (or the pool) asked us to wait
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimitExceeded, message).with_status(429)
        }
    }

    pub fn server(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message).with_status(status_code)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("attempt timed out after {}ms", after.as_millis()),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn location(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Location, message)
    }

    pub fn offline() -> Self {
        Self::new(
            ErrorKind::Offline,
            "offline mode is enabled, refusing to call the provider",
        )
    }

    pub fn pool_exhausted(retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::PoolExhausted, "no credential is currently eligible")
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimitExceeded.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(ErrorKind::ServiceUnavailable.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());

        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::Location.is_retryable());
        assert!(!ErrorKind::Offline.is_retryable());
        assert!(!ErrorKind::InvalidRequest.is_retryable());
    }

    #[test]
    fn test_breaker_effects() {
        assert_eq!(ErrorKind::RateLimitExceeded.breaker_effect(), BreakerEffect::Count);
        assert_eq!(ErrorKind::ServerError.breaker_effect(), BreakerEffect::Count);
        assert_eq!(ErrorKind::Timeout.breaker_effect(), BreakerEffect::Count);
        assert_eq!(ErrorKind::Validation.breaker_effect(), BreakerEffect::Count);
        assert_eq!(ErrorKind::Authentication.breaker_effect(), BreakerEffect::Trip);
        assert_eq!(ErrorKind::Location.breaker_effect(), BreakerEffect::Trip);
        assert_eq!(ErrorKind::ServiceUnavailable.breaker_effect(), BreakerEffect::None);
        assert_eq!(ErrorKind::Offline.breaker_effect(), BreakerEffect::None);
        assert!(!ErrorKind::ServiceUnavailable.is_key_scoped());
        assert!(ErrorKind::Authentication.is_key_scoped());
    }

    #[test]
    fn test_rate_limited_keeps_metadata() {
        let err = ProviderError::rate_limited("quota exceeded", Some(Duration::from_secs(7)));
        assert_eq!(err.kind, ErrorKind::RateLimitExceeded);
        assert_eq!(err.status_code, Some(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(err.to_string(), "rate_limit_exceeded: quota exceeded");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"service_unavailable\"");
    }
}
