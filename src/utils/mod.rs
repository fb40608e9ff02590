//! Utility modules
//!
//! Backoff delays and deadline handling for the pool client.

pub mod retry;
pub mod timeout;

pub use retry::BackoffConfig;
pub use timeout::{earliest, with_deadline, with_timeout, TimeoutError};
