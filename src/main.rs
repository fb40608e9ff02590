//! genai-pool
//!
//! Runs one text or vision generation through a pool of API keys.

use anyhow::{Context, Result};
use clap::Parser;
use genai_pool::{
    config::{Environment, Settings},
    logging::{init_tracing, LogFormat},
    services::{
        transport::{mime_from_extension, sniff_image_mime},
        GeminiTransport, GenerateOptions, GenerationRequest, KeyPool, PoolClient, StrategyKind,
    },
    ProviderError,
};
use std::path::PathBuf;
use std::sync::Arc;

/// genai-pool
///
/// Send a prompt (optionally with an image) to the model, spreading load
/// over every key in GENAI_API_KEYS.
#[derive(Parser, Debug)]
#[command(name = "genai-pool")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Prompt text
    #[arg(short, long)]
    prompt: String,

    /// Image to send along with the prompt
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// MIME type of the image (guessed from the file when omitted)
    #[arg(long, requires = "image")]
    mime: Option<String>,

    /// Model name (overrides GENAI_MODEL env var)
    #[arg(short, long)]
    model: Option<String>,

    /// Ask the model for a JSON response
    #[arg(long)]
    json: bool,

    /// Attempts per call (overrides GENAI_MAX_ATTEMPTS env var)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Key selection strategy (overrides GENAI_STRATEGY env var)
    #[arg(long)]
    strategy: Option<String>,

    /// Refuse to contact the provider
    #[arg(long)]
    offline: bool,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (overrides LOG_FORMAT env var)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Print key pool statistics as JSON after the call
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load_unvalidated()?;

    // Override settings with CLI arguments
    if let Some(log_level) = args.log_level.clone() {
        settings.log_level = log_level;
    }
    if let Some(format) = args.log_format {
        settings.log_format = format;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    if let Some(model) = args.model.clone() {
        settings.genai.model = model;
    }
    if let Some(attempts) = args.max_attempts {
        settings.genai.max_attempts = attempts;
    }
    if let Some(strategy) = args.strategy.as_deref() {
        settings.genai.strategy = strategy
            .parse::<StrategyKind>()
            .context("Invalid --strategy value")?;
    }
    if args.offline {
        settings.genai.offline = true;
    }
    settings.validate()?;

    init_tracing(&settings.log_level, settings.log_format)?;

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        keys = settings.genai.api_keys.len(),
        strategy = %settings.genai.strategy,
        "Starting application"
    );

    // Offline without keys: nothing to build a pool from, and nothing to call.
    if settings.genai.api_keys.is_empty() {
        return Err(ProviderError::offline().into());
    }

    let pool = Arc::new(KeyPool::from_keys(
        settings.genai.api_keys.clone(),
        settings.pool_config(),
    )?);
    let transport = Arc::new(GeminiTransport::new(settings.transport_config())?);
    let client = PoolClient::new(pool, transport, settings.client_config());

    let options = GenerateOptions::new().with_json_response(args.json);

    let result = match &args.image {
        Some(path) => {
            let image = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            let mime_type = args
                .mime
                .clone()
                .or_else(|| mime_from_extension(path).map(str::to_string))
                .or_else(|| sniff_image_mime(&image).map(str::to_string))
                .context("Cannot tell the image type, pass --mime")?;

            let request = GenerationRequest::vision(image, mime_type, args.prompt.clone(), options);
            client.call(&request, client.attempts_for(&request)).await
        }
        None => client.generate_text(args.prompt.clone(), options).await,
    };

    match &result {
        Ok(response) => {
            println!("{}", response.text);
            if let Some(usage) = &response.usage {
                tracing::info!(
                    prompt_tokens = usage.prompt_tokens,
                    output_tokens = usage.output_tokens,
                    total_tokens = usage.total_tokens,
                    "Generation complete"
                );
            }
        }
        Err(err) => {
            tracing::error!(
                kind = %err.kind,
                status = err.status_code,
                retry_after_ms = err.retry_after.map(|d| d.as_millis() as u64),
                "Generation failed"
            );
        }
    }

    if args.stats {
        let stats = client.get_stats();
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    result.map(|_| ()).map_err(Into::into)
}
