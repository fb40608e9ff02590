//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use crate::logging::LogFormat;
use crate::services::client::{ClientConfig, RateLimitRetry};
use crate::services::key_pool::{BreakerConfig, PoolConfig, StrategyKind};
use crate::services::transport::GeminiTransportConfig;
use crate::utils::retry::BackoffConfig;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Provider and key pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenAiSettings {
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub model: String,

    // Key pool
    pub qps_per_key: f64,
    pub burst_multiplier: f64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub max_cooldown_secs: u64,
    /// 1.0 keeps the cooldown fixed after failed trials
    pub cooldown_growth: f64,
    pub strategy: StrategyKind,

    // Client
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub offline: bool,
    /// Retry a 429 on another key first instead of waiting on the same one
    pub rate_limit_rotate: bool,
    pub service_unavailable_delay_ms: u64,
}

impl Default for GenAiSettings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            base_url: GeminiTransportConfig::default().base_url,
            model: GeminiTransportConfig::default().model,
            qps_per_key: 1.0,
            burst_multiplier: 2.0,
            failure_threshold: 3,
            cooldown_secs: 60,
            max_cooldown_secs: 600,
            cooldown_growth: 1.0,
            strategy: StrategyKind::RoundRobin,
            max_attempts: 3,
            request_timeout_secs: 60,
            call_timeout_secs: 300,
            offline: false,
            rate_limit_rotate: true,
            service_unavailable_delay_ms: 2000,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,
    pub log_format: LogFormat,

    // Provider settings
    pub genai: GenAiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "genai-pool".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            genai: GenAiSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like `load`, but leaves validation to the caller
    ///
    /// Used when command line overrides still have to be applied.
    pub fn load_unvalidated() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::parse_lookup(|key| env::var(key).ok())
    }

    /// Build and validate settings from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Self::parse_lookup(lookup)?;
        settings.validate()?;
        Ok(settings)
    }

    fn parse_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GenAiSettings::default();
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let settings = Self {
            // App settings
            app_name: var("APP_NAME", "genai-pool"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: var("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: var("LOG_LEVEL", "info"),
            log_format: var("LOG_FORMAT", "json")
                .parse()
                .context("Invalid LOG_FORMAT value")?,

            genai: GenAiSettings {
                api_keys: parse_keys(&var("GENAI_API_KEYS", "")),
                base_url: var("GENAI_BASE_URL", &defaults.base_url),
                model: var("GENAI_MODEL", &defaults.model),

                qps_per_key: parse_var(&lookup, "GENAI_QPS_PER_KEY", defaults.qps_per_key)?,
                burst_multiplier: parse_var(
                    &lookup,
                    "GENAI_BURST_MULTIPLIER",
                    defaults.burst_multiplier,
                )?,
                failure_threshold: parse_var(
                    &lookup,
                    "GENAI_FAILURE_THRESHOLD",
                    defaults.failure_threshold,
                )?,
                cooldown_secs: parse_var(&lookup, "GENAI_COOLDOWN_SECS", defaults.cooldown_secs)?,
                max_cooldown_secs: parse_var(
                    &lookup,
                    "GENAI_MAX_COOLDOWN_SECS",
                    defaults.max_cooldown_secs,
                )?,
                cooldown_growth: parse_var(
                    &lookup,
                    "GENAI_COOLDOWN_GROWTH",
                    defaults.cooldown_growth,
                )?,
                strategy: parse_var(&lookup, "GENAI_STRATEGY", defaults.strategy)?,

                max_attempts: parse_var(&lookup, "GENAI_MAX_ATTEMPTS", defaults.max_attempts)?,
                request_timeout_secs: parse_var(
                    &lookup,
                    "GENAI_REQUEST_TIMEOUT_SECS",
                    defaults.request_timeout_secs,
                )?,
                call_timeout_secs: parse_var(
                    &lookup,
                    "GENAI_CALL_TIMEOUT_SECS",
                    defaults.call_timeout_secs,
                )?,
                offline: parse_var(&lookup, "GENAI_OFFLINE", defaults.offline)?,
                rate_limit_rotate: parse_var(
                    &lookup,
                    "GENAI_RATE_LIMIT_ROTATE",
                    defaults.rate_limit_rotate,
                )?,
                service_unavailable_delay_ms: parse_var(
                    &lookup,
                    "GENAI_SERVICE_UNAVAILABLE_DELAY_MS",
                    defaults.service_unavailable_delay_ms,
                )?,
            },
        };

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        let genai = &self.genai;

        if !genai.qps_per_key.is_finite() || genai.qps_per_key <= 0.0 {
            anyhow::bail!("GENAI_QPS_PER_KEY must be > 0");
        }
        if !genai.burst_multiplier.is_finite() || genai.burst_multiplier < 1.0 {
            anyhow::bail!("GENAI_BURST_MULTIPLIER must be >= 1");
        }
        if genai.qps_per_key * genai.burst_multiplier < 1.0 {
            anyhow::bail!("GENAI_QPS_PER_KEY * GENAI_BURST_MULTIPLIER must allow at least one request");
        }
        if genai.failure_threshold == 0 {
            anyhow::bail!("GENAI_FAILURE_THRESHOLD must be > 0");
        }
        if genai.max_attempts == 0 {
            anyhow::bail!("GENAI_MAX_ATTEMPTS must be > 0");
        }
        if !genai.cooldown_growth.is_finite() || genai.cooldown_growth < 1.0 {
            anyhow::bail!("GENAI_COOLDOWN_GROWTH must be >= 1.0");
        }
        if genai.max_cooldown_secs < genai.cooldown_secs {
            anyhow::bail!("GENAI_MAX_COOLDOWN_SECS must be >= GENAI_COOLDOWN_SECS");
        }
        if genai.request_timeout_secs == 0 || genai.call_timeout_secs == 0 {
            anyhow::bail!("GENAI timeouts must be > 0");
        }
        if genai.api_keys.is_empty() && !genai.offline {
            anyhow::bail!("GENAI_API_KEYS must list at least one key unless GENAI_OFFLINE is set");
        }

        if self.environment == Environment::Production && genai.offline {
            tracing::warn!("Running in production with offline mode enabled!");
        }

        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        let genai = &self.genai;
        let breaker = BreakerConfig::new(
            genai.failure_threshold,
            Duration::from_secs(genai.cooldown_secs),
        )
        .with_max_cooldown(Duration::from_secs(genai.max_cooldown_secs))
        .with_growth(genai.cooldown_growth);

        PoolConfig::new(genai.qps_per_key)
            .with_burst_multiplier(genai.burst_multiplier)
            .with_breaker(breaker)
            .with_strategy(genai.strategy)
    }

    pub fn client_config(&self) -> ClientConfig {
        let genai = &self.genai;
        let rate_limit_retry = if genai.rate_limit_rotate {
            RateLimitRetry::RotateFirst
        } else {
            RateLimitRetry::WaitAdvertised
        };

        ClientConfig::default()
            .with_max_attempts(genai.max_attempts)
            .with_request_timeout(Duration::from_secs(genai.request_timeout_secs))
            .with_call_timeout(Duration::from_secs(genai.call_timeout_secs))
            .with_offline(genai.offline)
            .with_rate_limit_retry(rate_limit_retry)
            .with_service_unavailable_delay(Duration::from_millis(
                genai.service_unavailable_delay_ms,
            ))
            .with_backoff(BackoffConfig::default())
    }

    pub fn transport_config(&self) -> GeminiTransportConfig {
        GeminiTransportConfig::default()
            .with_base_url(self.genai.base_url.clone())
            .with_model(self.genai.model.clone())
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

/// Comma-separated key list, blanks dropped
fn parse_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", key, raw)),
        _ => Ok(default),
    }
}
