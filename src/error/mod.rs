//! Error types shared across the pool

mod types;

pub use types::{BreakerEffect, ErrorKind, ProviderError};
