//! Pool client
//!
//! `PoolClient` runs one generation call through the key pool:
//! select a key, wait for its rate limiter, dispatch, then either return,
//! retry (possibly on another key) or give up with the last classified error.
//! Every wait is bounded by the attempt deadline, which never extends past
//! the call deadline.

use crate::error::{ErrorKind, ProviderError};
use crate::services::key_pool::{AttemptOutcome, KeyPool, PoolStats};
use crate::services::transport::{
    sniff_image_mime, GenerateOptions, GenerationRequest, Transport, TransportResponse,
};
use crate::utils::retry::BackoffConfig;
use crate::utils::timeout::{with_deadline, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Configuration
// ============================================================================

/// What to do after a key answered 429
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitRetry {
    /// Retry at once on another eligible key; wait the advertised delay only
    /// when no other key is available
    #[default]
    RotateFirst,
    /// Always wait the advertised delay, then select normally
    WaitAdvertised,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Attempts per call, the first one included
    pub max_attempts: u32,
    /// Budget for one attempt: key selection, limiter wait and dispatch
    pub request_timeout: Duration,
    /// Budget for the whole call, retries included
    pub call_timeout: Duration,
    /// Refuse every call before any network attempt
    pub offline: bool,
    pub rate_limit_retry: RateLimitRetry,
    /// Wait after a 429 that did not say how long to wait
    pub rate_limit_delay: Duration,
    /// Wait after a service-wide outage answer
    pub service_unavailable_delay: Duration,
    /// Delays after server errors and timeouts
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(300),
            offline: false,
            rate_limit_retry: RateLimitRetry::RotateFirst,
            rate_limit_delay: Duration::from_secs(5),
            service_unavailable_delay: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_rate_limit_retry(mut self, policy: RateLimitRetry) -> Self {
        self.rate_limit_retry = policy;
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    pub fn with_service_unavailable_delay(mut self, delay: Duration) -> Self {
        self.service_unavailable_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

// ============================================================================
// Pool Client
// ============================================================================

pub struct PoolClient {
    pool: Arc<KeyPool>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl PoolClient {
    pub fn new(pool: Arc<KeyPool>, transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        tracing::info!(
            transport = transport.name(),
            keys = pool.len(),
            max_attempts = config.max_attempts,
            offline = config.offline,
            "Pool client ready"
        );
        Self {
            pool,
            transport,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn generate_text(
        &self,
        prompt: impl Into<String>,
        options: GenerateOptions,
    ) -> Result<TransportResponse, ProviderError> {
        let request = GenerationRequest::text(prompt, options);
        self.call(&request, self.attempts_for(&request)).await
    }

    /// Describe an image; the MIME type is detected from the bytes
    pub async fn generate_vision(
        &self,
        image: Vec<u8>,
        prompt: impl Into<String>,
        options: GenerateOptions,
    ) -> Result<TransportResponse, ProviderError> {
        if self.config.offline {
            tracing::debug!("Offline mode, skipping provider call");
            return Err(ProviderError::offline());
        }
        let mime_type = sniff_image_mime(&image).ok_or_else(|| {
            ProviderError::invalid_request("unrecognized image format, expected PNG, JPEG, GIF or WebP")
        })?;
        let request = GenerationRequest::vision(image, mime_type, prompt, options);
        self.call(&request, self.attempts_for(&request)).await
    }

    pub fn get_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Attempt budget for `request`: its own override or the client default
    pub fn attempts_for(&self, request: &GenerationRequest) -> u32 {
        request
            .options
            .max_attempts
            .unwrap_or(self.config.max_attempts)
    }

    /// Run `request` with at most `max_attempts` dispatches
    pub async fn call(
        &self,
        request: &GenerationRequest,
        max_attempts: u32,
    ) -> Result<TransportResponse, ProviderError> {
        if self.config.offline {
            tracing::debug!("Offline mode, skipping provider call");
            return Err(ProviderError::offline());
        }
        if max_attempts == 0 {
            return Err(ProviderError::invalid_request("max_attempts must be at least 1"));
        }

        let call_budget = request
            .options
            .call_timeout
            .unwrap_or(self.config.call_timeout);
        let attempt_timeout = request
            .options
            .timeout
            .unwrap_or(self.config.request_timeout);
        let call_deadline = Instant::now() + call_budget;

        let mut last_error: Option<ProviderError> = None;
        let mut avoid: Option<usize> = None;

        for attempt in 1..=max_attempts {
            let now = Instant::now();
            if now >= call_deadline {
                break;
            }
            let attempt_deadline = (now + attempt_timeout).min(call_deadline);

            // SELECT
            let lease = match self.pool.acquire_slot(avoid, Some(attempt_deadline)).await {
                Ok(lease) => lease,
                Err(exhausted) => {
                    tracing::debug!(attempt = attempt, "No key available for attempt");
                    last_error.get_or_insert(exhausted);
                    continue;
                }
            };
            let slot_id = lease.id();

            // RATE_LIMIT_WAIT
            match with_deadline(attempt_deadline, lease.limiter().acquire(1)).await {
                Ok(waited) => {
                    if !waited.is_zero() {
                        tracing::debug!(
                            credential = %lease.name(),
                            wait_ms = waited.as_millis() as u64,
                            "Waited for rate limiter"
                        );
                    }
                }
                Err(TimeoutError::Inner(err)) => return Err(err),
                Err(TimeoutError::Timeout(_)) => {
                    // Nothing was sent: the key is not blamed, the lease just goes back.
                    tracing::warn!(
                        credential = %lease.name(),
                        attempt = attempt,
                        "Deadline reached while waiting for rate limiter"
                    );
                    last_error = Some(ProviderError::new(
                        ErrorKind::Timeout,
                        format!("timed out waiting for rate limiter on {}", lease.name()),
                    ));
                    avoid = Some(slot_id);
                    continue;
                }
            }

            // DISPATCH
            tracing::debug!(
                credential = %lease.name(),
                attempt = attempt,
                max_attempts = max_attempts,
                trial = lease.is_trial(),
                "Dispatching request"
            );
            let dispatched_at = Instant::now();
            let remaining = attempt_deadline.saturating_duration_since(dispatched_at);
            let result = match with_deadline(
                attempt_deadline,
                self.transport.invoke(lease.credential(), request, remaining),
            )
            .await
            {
                Ok(response) => Ok(response),
                Err(TimeoutError::Inner(err)) => Err(err),
                Err(TimeoutError::Timeout(budget)) => Err(ProviderError::timeout(budget)),
            };
            let latency = dispatched_at.elapsed();

            let err = match result {
                Ok(response) => {
                    self.pool
                        .record_outcome(lease, AttemptOutcome::Success { latency });
                    return Ok(response);
                }
                Err(err) => err,
            };

            let credential = lease.name().to_string();
            self.pool.record_outcome(
                lease,
                AttemptOutcome::Failure {
                    kind: err.kind,
                    latency,
                },
            );

            if !err.is_retryable() {
                tracing::warn!(
                    credential = %credential,
                    kind = %err.kind,
                    status = err.status_code,
                    "Request failed with non-retryable error"
                );
                return Err(err);
            }
            if attempt == max_attempts {
                last_error = Some(err);
                break;
            }

            let delay = self.retry_delay(&err, attempt, slot_id);
            if Instant::now() + delay >= call_deadline {
                tracing::warn!(
                    credential = %credential,
                    kind = %err.kind,
                    delay_ms = delay.as_millis() as u64,
                    "Retry delay exceeds call deadline, giving up"
                );
                return Err(err);
            }

            avoid = match (err.kind, self.config.rate_limit_retry) {
                (ErrorKind::RateLimitExceeded, RateLimitRetry::WaitAdvertised) => None,
                _ => Some(slot_id),
            };

            tracing::warn!(
                credential = %credential,
                attempt = attempt,
                kind = %err.kind,
                delay_ms = delay.as_millis() as u64,
                "Retrying after failure"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            last_error = Some(err);
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::new(
                ErrorKind::Timeout,
                format!("call deadline of {}ms reached", call_budget.as_millis()),
            )
        }))
    }

    fn retry_delay(&self, err: &ProviderError, attempt: u32, slot_id: usize) -> Duration {
        match err.kind {
            ErrorKind::RateLimitExceeded => {
                let advertised = err.retry_after.unwrap_or(self.config.rate_limit_delay);
                match self.config.rate_limit_retry {
                    RateLimitRetry::RotateFirst if self.pool.has_eligible_except(slot_id) => {
                        Duration::ZERO
                    }
                    _ => advertised,
                }
            }
            ErrorKind::ServiceUnavailable => err
                .retry_after
                .unwrap_or(self.config.service_unavailable_delay),
            ErrorKind::ServerError | ErrorKind::Timeout => {
                self.config.backoff.calculate_delay(attempt - 1)
            }
            _ => Duration::ZERO,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
