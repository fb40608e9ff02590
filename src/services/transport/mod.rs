//! Provider transports
//!
//! A transport sends one generation request with one credential and maps
//! every failure onto the `ErrorKind` taxonomy. Retries, key rotation and
//! rate limiting all live above this layer.

mod gemini;
mod stub;

pub use gemini::{GeminiTransport, GeminiTransportConfig};
pub use stub::{StubReply, StubTransport};

use crate::error::ProviderError;
use crate::services::key_pool::Credential;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Transport Trait
// ============================================================================

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Send `request` authenticated with `credential`
    ///
    /// `timeout` bounds the whole exchange, body included. Implementations
    /// fail only with classified `ProviderError`s.
    async fn invoke(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, ProviderError>;
}

// ============================================================================
// Requests
// ============================================================================

/// What to generate from
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text {
        prompt: String,
    },
    Vision {
        prompt: String,
        image: Vec<u8>,
        mime_type: String,
    },
}

impl Payload {
    pub fn prompt(&self) -> &str {
        match self {
            Payload::Text { prompt } | Payload::Vision { prompt, .. } => prompt,
        }
    }

    pub fn is_vision(&self) -> bool {
        matches!(self, Payload::Vision { .. })
    }
}

/// Per-call generation parameters and retry overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    /// Model to use instead of the transport's default
    pub model: Option<String>,
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// Ask the provider for a JSON document instead of free text
    pub json_response: bool,
    /// Overrides the client's attempt budget for this call
    pub max_attempts: Option<u32>,
    /// Overrides the per-attempt timeout for this call
    pub timeout: Option<Duration>,
    /// Overrides the overall budget of this call, retries included
    pub call_timeout: Option<Duration>,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_json_response(mut self, json: bool) -> Self {
        self.json_response = json;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub payload: Payload,
    pub options: GenerateOptions,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>, options: GenerateOptions) -> Self {
        Self {
            payload: Payload::Text {
                prompt: prompt.into(),
            },
            options,
        }
    }

    pub fn vision(
        image: Vec<u8>,
        mime_type: impl Into<String>,
        prompt: impl Into<String>,
        options: GenerateOptions,
    ) -> Self {
        Self {
            payload: Payload::Vision {
                prompt: prompt.into(),
                image,
                mime_type: mime_type.into(),
            },
            options,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportResponse {
    pub text: String,
    /// Model version reported by the provider
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl TransportResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            usage: None,
        }
    }
}

// ============================================================================
// MIME Detection
// ============================================================================

/// Identify common image formats from their magic bytes
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

/// Guess an image MIME type from a file extension
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_image_mime() {
        assert_eq!(sniff_image_mime(b"\x89PNG\r\n\x1a\n"), Some("image/png"));
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image_mime(b"GIF89a"), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_mime(b"hello"), None);
        assert_eq!(sniff_image_mime(&[]), None);
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension(Path::new("a/b.PNG")), Some("image/png"));
        assert_eq!(mime_from_extension(Path::new("photo.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("notes.txt")), None);
        assert_eq!(mime_from_extension(Path::new("noext")), None);
    }

    #[test]
    fn test_payload_prompt() {
        let text = GenerationRequest::text("hi", GenerateOptions::new());
        assert_eq!(text.payload.prompt(), "hi");
        assert!(!text.payload.is_vision());

        let vision = GenerationRequest::vision(vec![1, 2], "image/png", "describe", GenerateOptions::new());
        assert_eq!(vision.payload.prompt(), "describe");
        assert!(vision.payload.is_vision());
    }
}
