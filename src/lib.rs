//! Multi-key generative AI client
//!
//! Spreads generation requests over a pool of API keys, with a token bucket
//! and a circuit breaker per key and a retry policy driven by the kind of
//! failure the provider reported.

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::{ErrorKind, ProviderError};
pub use services::{GenerateOptions, KeyPool, PoolClient};
