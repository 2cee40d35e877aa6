use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::ImageServiceClient;
use crate::{
    config::GeminiConfig,
    error::{PipelineError, Result},
    models::{GenerationRequest, ResponsePart, ServiceResponse},
};

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Gemini `generateContent` over HTTP.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            PipelineError::ConfigurationError("GEMINI_API_KEY or GOOGLE_API_KEY not set".into())
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| PipelineError::ConfigurationError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    pub fn endpoint(&self) -> String {
        let model = self.config.model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        format!(
            "{}/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model_path
        )
    }

    pub fn build_payload(request: &GenerationRequest) -> Value {
        let mut parts = Vec::new();
        if let Some(reference) = &request.reference_image {
            parts.push(json!({
                "inlineData": {
                    "mimeType": reference.mime_type,
                    "data": STANDARD.encode(&reference.data),
                }
            }));
        }
        parts.push(json!({ "text": request.prompt }));

        let mut image_config = Map::new();
        if let Some(ratio) = request.ratio_hint.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            image_config.insert("aspectRatio".to_string(), json!(ratio));
        }
        if let Some(size) = request.size_hint.as_deref().map(normalize_size_hint).filter(|s| !s.is_empty()) {
            image_config.insert("imageSize".to_string(), json!(size));
        }

        let mut generation_config = Map::new();
        generation_config.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
        if !image_config.is_empty() {
            generation_config.insert("imageConfig".to_string(), Value::Object(image_config));
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": Value::Object(generation_config),
        })
    }

    /// Turn a successful response body into ordered parts.
    pub fn parse_response(body: &str) -> Result<ServiceResponse> {
        let response: GenerateContentResponse = serde_json::from_str(body)
            .map_err(|e| PipelineError::ServiceError(format!("Unreadable response: {}", e)))?;

        let mut parts = Vec::new();
        for candidate in response.candidates {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(text) = part.text.filter(|t| !t.trim().is_empty()) {
                    parts.push(ResponsePart::Text { text });
                }
                if let Some(inline) = part.inline_data.filter(|d| !d.data.is_empty()) {
                    let data = STANDARD
                        .decode(inline.data.as_bytes())
                        .map_err(|e| PipelineError::ServiceError(format!("Image base64 decode failed: {}", e)))?;
                    parts.push(ResponsePart::Image {
                        data,
                        mime_type: inline.mime_type.unwrap_or_else(|| "image/png".to_string()),
                    });
                }
            }
            if let Some(reason) = candidate.finish_reason.filter(|r| r != "STOP") {
                log::warn!("Gemini finished with reason {}", reason);
                if parts.is_empty() {
                    parts.push(ResponsePart::Text {
                        text: format!("finish reason: {}", reason),
                    });
                }
            }
        }

        if parts.is_empty() {
            if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
                parts.push(ResponsePart::Text {
                    text: format!("prompt blocked: {}", reason),
                });
            }
        }

        Ok(ServiceResponse::new(parts))
    }

    /// Upstream message for a non-success status, falling back to the raw body.
    pub fn error_detail(status: reqwest::StatusCode, body: &str) -> String {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => envelope.error.message,
            Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
            Err(_) => body.to_string(),
        }
    }
}

/// `1k`/`2k`/`4k` are upper-cased; anything else is passed through.
fn normalize_size_hint(size: &str) -> String {
    let trimmed = size.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "1k" | "2k" | "4k" => trimmed.to_ascii_uppercase(),
        _ => trimmed.to_string(),
    }
}

#[async_trait]
impl ImageServiceClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(&self, request: &GenerationRequest) -> Result<ServiceResponse> {
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request);

        log::info!("Invoking model: {} ({:?})", self.config.model, request.mode);

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                log::error!("Gemini request error details: {:?}", e);
                PipelineError::ServiceError(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::ServiceError(e.to_string()))?;

        if !status.is_success() {
            let detail = Self::error_detail(status, &body);
            log::error!("Gemini returned {}: {}", status, detail);
            return Err(PipelineError::ServiceError(detail));
        }

        Self::parse_response(&body)
    }
}
