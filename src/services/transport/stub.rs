//! Scripted transport for tests and dry runs

use super::{GenerationRequest, Transport, TransportResponse};
use crate::error::ProviderError;
use crate::services::key_pool::Credential;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One scripted answer
#[derive(Debug, Clone)]
pub enum StubReply {
    Text(String),
    Fail(ProviderError),
    /// Never answer; only the caller's deadline ends the attempt
    Hang,
}

/// Transport that replays scripted replies per credential name
///
/// Each credential has its own queue; once it is empty the default reply is
/// used. Every invocation is counted, per key and in total.
#[derive(Debug)]
pub struct StubTransport {
    scripts: Mutex<HashMap<String, VecDeque<StubReply>>>,
    calls_by_key: Mutex<HashMap<String, usize>>,
    default_reply: StubReply,
    latency: Duration,
    calls: AtomicUsize,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StubTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls_by_key: Mutex::new(HashMap::new()),
            default_reply: StubReply::Text("ok".to_string()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_default(mut self, reply: StubReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Simulated round-trip time added to every reply
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue replies for the credential named `key`
    pub fn script<I>(self, key: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = StubReply>,
    {
        lock(&self.scripts)
            .entry(key.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Total number of invocations
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: &str) -> usize {
        lock(&self.calls_by_key).get(key).copied().unwrap_or(0)
    }

    fn next_reply(&self, key: &str) -> StubReply {
        lock(&self.scripts)
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn invoke(
        &self,
        credential: &Credential,
        _request: &GenerationRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.calls_by_key)
            .entry(credential.name().to_string())
            .or_insert(0) += 1;

        let reply = self.next_reply(credential.name());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply {
            StubReply::Text(text) => Ok(TransportResponse::text(text)),
            StubReply::Fail(err) => Err(err),
            StubReply::Hang => std::future::pending().await,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::transport::GenerateOptions;

    #[tokio::test]
    async fn test_scripted_then_default() {
        let stub = StubTransport::new().script(
            "key_1",
            [
                StubReply::Fail(ProviderError::server(500, "boom")),
                StubReply::Text("first".to_string()),
            ],
        );
        let cred = Credential::new("key_1", "k");
        let other = Credential::new("key_2", "k");
        let request = GenerationRequest::text("hi", GenerateOptions::new());
        let timeout = Duration::from_secs(1);

        let err = stub.invoke(&cred, &request, timeout).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(stub.invoke(&cred, &request, timeout).await.unwrap().text, "first");
        assert_eq!(stub.invoke(&cred, &request, timeout).await.unwrap().text, "ok");
        assert_eq!(stub.invoke(&other, &request, timeout).await.unwrap().text, "ok");

        assert_eq!(stub.calls(), 4);
        assert_eq!(stub.calls_for("key_1"), 3);
        assert_eq!(stub.calls_for("key_2"), 1);
        assert_eq!(stub.calls_for("key_3"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_answers() {
        let stub = StubTransport::new().with_default(StubReply::Hang);
        let cred = Credential::new("key_1", "k");
        let request = GenerationRequest::text("hi", GenerateOptions::new());

        let result = tokio::time::timeout(
            Duration::from_secs(30),
            stub.invoke(&cred, &request, Duration::from_secs(1)),
        )
        .await;
        assert!(result.is_err());
    }
}
