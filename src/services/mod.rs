//! Services module
//!
//! The key pool, the provider transports and the client tying them together.

pub mod client;
pub mod key_pool;
pub mod transport;

pub use client::{ClientConfig, PoolClient, RateLimitRetry};
pub use key_pool::{KeyPool, PoolConfig, PoolStats, StrategyKind};
pub use transport::{
    GeminiTransport, GeminiTransportConfig, GenerateOptions, GenerationRequest, Payload,
    StubReply, StubTransport, TokenUsage, Transport, TransportResponse,
};
