//! Gemini REST transport
//!
//! Calls `models/{model}:generateContent` with one API key per request and
//! classifies every non-success answer into the pool's error taxonomy.

use super::{GenerationRequest, Payload, TokenUsage, Transport, TransportResponse};
use crate::error::{ErrorKind, ProviderError};
use crate::services::key_pool::Credential;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Longest provider message kept in an error
const MAX_ERROR_MESSAGE: usize = 512;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiTransportConfig {
    /// Base URL (default: generativelanguage.googleapis.com)
    pub base_url: String,
    /// Model used when the request does not name one
    pub model: String,
    pub connect_timeout: Duration,
}

impl Default for GeminiTransportConfig {
    fn default() -> Self {
        Self {
            base_url: GEMINI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl GeminiTransportConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    /// Base64-encoded bytes
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

// ============================================================================
// Gemini Transport
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiTransport {
    client: Client,
    config: GeminiTransportConfig,
}

impl GeminiTransport {
    pub fn new(config: GeminiTransportConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                ProviderError::invalid_request(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn invoke(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, ProviderError> {
        let model = request
            .options
            .model
            .as_deref()
            .unwrap_or(&self.config.model);
        let url = self.endpoint(model);

        tracing::debug!(
            model = %model,
            credential = %credential.name(),
            vision = request.payload.is_vision(),
            "Calling Gemini generateContent API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential.api_key())
            .timeout(timeout)
            .json(&build_body(request))
            .send()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;

        if !(200..300).contains(&status) {
            return Err(classify_status(status, retry_after, &body));
        }

        parse_response(&body)
    }
}

// ============================================================================
// Encoding and Classification
// ============================================================================

fn build_body(request: &GenerationRequest) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(2);
    if let Payload::Vision {
        image, mime_type, ..
    } = &request.payload
    {
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.clone(),
                data: STANDARD.encode(image),
            }),
        });
    }
    parts.push(Part {
        text: Some(request.payload.prompt().to_string()),
        inline_data: None,
    });

    let options = &request.options;
    let generation_config = if options.temperature.is_some()
        || options.max_output_tokens.is_some()
        || options.json_response
    {
        Some(GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
            response_mime_type: options
                .json_response
                .then(|| "application/json".to_string()),
        })
    } else {
        None
    };

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        system_instruction: options.system_instruction.as_ref().map(|text| Content {
            role: None,
            parts: vec![Part {
                text: Some(text.clone()),
                inline_data: None,
            }],
        }),
        generation_config,
    }
}

fn parse_response(body: &str) -> Result<TransportResponse, ProviderError> {
    let parsed: GenerateContentResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse Gemini response");
        ProviderError::validation(format!("unparseable provider response: {}", e))
    })?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::validation("provider returned no candidates"))?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ProviderError::validation(format!(
            "provider returned no text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(TransportResponse {
        text,
        model: parsed.model_version,
        usage: parsed.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }),
    })
}

fn classify_reqwest(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(timeout)
    } else if err.is_decode() {
        ProviderError::validation(format!("failed to read provider response: {}", err))
    } else {
        // Connection refused, reset, DNS: the service, not the key
        ProviderError::unavailable(format!("request failed: {}", err))
    }
}

/// Map a non-success HTTP answer onto the error taxonomy
fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = match &envelope {
        Some(env) if !env.error.message.is_empty() => env.error.message.clone(),
        _ => truncate(body, MAX_ERROR_MESSAGE),
    };
    let lowered = message.to_lowercase();

    match status {
        429 => {
            let delay = retry_after.or_else(|| {
                envelope
                    .as_ref()
                    .and_then(|env| retry_delay(&env.error.details))
            });
            ProviderError::rate_limited(message, delay)
        }
        503 | 529 => ProviderError::unavailable(message).with_status(status),
        500..=599 => ProviderError::server(status, message),
        401 | 403 => ProviderError::authentication(message).with_status(status),
        408 => ProviderError::new(ErrorKind::Timeout, message).with_status(status),
        400 if lowered.contains("location") || lowered.contains("region") => {
            ProviderError::location(message).with_status(status)
        }
        400 if lowered.contains("api key")
            || envelope
                .as_ref()
                .and_then(|env| env.error.status.as_deref())
                == Some("UNAUTHENTICATED") =>
        {
            ProviderError::authentication(message).with_status(status)
        }
        _ => ProviderError::validation(message).with_status(status),
    }
}

/// `retryDelay` from a `google.rpc.RetryInfo` detail, e.g. "17s" or "1.5s"
fn retry_delay(details: &[serde_json::Value]) -> Option<Duration> {
    details
        .iter()
        .filter(|d| {
            d.get("@type")
                .and_then(|t| t.as_str())
                .map_or(false, |t| t.ends_with("RetryInfo"))
        })
        .filter_map(|d| d.get("retryDelay").and_then(|v| v.as_str()))
        .find_map(|v| v.strip_suffix('s').and_then(|secs| secs.parse::<f64>().ok()))
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::GenerateOptions;

    fn error_body(code: u16, status: &str, message: &str) -> String {
        serde_json::json!({
            "error": { "code": code, "message": message, "status": status }
        })
        .to_string()
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let transport = GeminiTransport::new(
            GeminiTransportConfig::default().with_base_url("http://localhost:8080/v1beta/"),
        )
        .unwrap();
        assert_eq!(
            transport.endpoint("gemini-pro"),
            "http://localhost:8080/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn test_text_body() {
        let request = GenerationRequest::text("Hello", GenerateOptions::new());
        let json = serde_json::to_value(build_body(&request)).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hello");
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_vision_body_with_options() {
        let options = GenerateOptions::new()
            .with_temperature(0.2)
            .with_max_output_tokens(256)
            .with_json_response(true)
            .with_system_instruction("Answer in JSON");
        let request = GenerationRequest::vision(vec![1, 2, 3], "image/png", "What is this?", options);
        let json = serde_json::to_value(build_body(&request)).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AQID");
        assert_eq!(parts[1]["text"], "What is this?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Answer in JSON");
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5},
            "modelVersion": "gemini-2.0-flash-001"
        }"#;

        let response = parse_response(body).unwrap();
        assert_eq!(response.text, "Hello there");
        assert_eq!(response.model.as_deref(), Some("gemini-2.0-flash-001"));
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn test_parse_response_without_text() {
        let blocked = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let err = parse_response(blocked).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("SAFETY"));

        assert_eq!(parse_response("{}").unwrap_err().kind, ErrorKind::Validation);
        assert_eq!(parse_response("<html>").unwrap_err().kind, ErrorKind::Validation);
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = classify_status(429, Some(Duration::from_secs(7)), "quota");
        assert_eq!(err.kind, ErrorKind::RateLimitExceeded);
        assert_eq!(err.status_code, Some(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));

        let body = serde_json::json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted",
                "status": "RESOURCE_EXHAUSTED",
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.QuotaFailure"},
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "1.5s"}
                ]
            }
        })
        .to_string();
        let err = classify_status(429, None, &body);
        assert_eq!(err.message, "Resource has been exhausted");
        assert_eq!(err.retry_after, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_classify_server_side() {
        let err = classify_status(503, None, &error_body(503, "UNAVAILABLE", "overloaded"));
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(err.status_code, Some(503));

        assert_eq!(classify_status(529, None, "").kind, ErrorKind::ServiceUnavailable);

        let err = classify_status(500, None, &error_body(500, "INTERNAL", "oops"));
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.status_code, Some(500));
        assert_eq!(err.message, "oops");

        assert_eq!(classify_status(408, None, "").kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_client_side() {
        assert_eq!(
            classify_status(403, None, &error_body(403, "PERMISSION_DENIED", "denied")).kind,
            ErrorKind::Authentication
        );
        assert_eq!(
            classify_status(
                400,
                None,
                &error_body(400, "INVALID_ARGUMENT", "API key not valid. Please pass a valid API key.")
            )
            .kind,
            ErrorKind::Authentication
        );
        assert_eq!(
            classify_status(
                400,
                None,
                &error_body(400, "FAILED_PRECONDITION", "User location is not supported for the API use.")
            )
            .kind,
            ErrorKind::Location
        );

        let err = classify_status(400, None, &error_body(400, "INVALID_ARGUMENT", "bad schema"));
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.status_code, Some(400));
        assert_eq!(classify_status(404, None, "not found").kind, ErrorKind::Validation);
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        let err = classify_status(502, None, &body);
        assert_eq!(err.message.len(), MAX_ERROR_MESSAGE + 3);
    }
}
