use async_trait::async_trait;
use aws_sdk_bedrockruntime::{error::ProvideErrorMetadata, primitives::Blob, Client};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};

use super::ImageServiceClient;
use crate::{
    config::BedrockConfig,
    error::{PipelineError, Result},
    models::{GenerationMode, GenerationRequest, ResponsePart, ServiceResponse},
};

pub const DEFAULT_TITAN_MODEL: &str = "amazon.titan-image-generator-v2:0";

#[derive(Deserialize)]
struct TitanImageResponse {
    #[serde(default)]
    images: Vec<String>,
    error: Option<String>,
}

/// Titan image generator on Bedrock. Generate uses `TEXT_IMAGE`, recolor uses
/// `IMAGE_VARIATION` with the reference image attached.
#[derive(Clone)]
pub struct BedrockImageClient {
    client: Client,
    model_id: String,
}

impl BedrockImageClient {
    pub async fn new(config: BedrockConfig) -> Result<Self> {
        let region = aws_sdk_bedrockruntime::config::Region::new(
            config.region.unwrap_or_else(|| "us-east-1".to_string()),
        );
        let aws_config = if let (Some(access_key), Some(secret_key)) =
            (&config.access_key, &config.secret_key)
        {
            aws_config::from_env()
                .credentials_provider(aws_sdk_bedrockruntime::config::Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "alphagen",
                ))
                .region(region)
                .load()
                .await
        } else {
            aws_config::from_env().region(region).load().await
        };

        Ok(Self {
            client: Client::new(&aws_config),
            model_id: config
                .model_id
                .unwrap_or_else(|| DEFAULT_TITAN_MODEL.to_string()),
        })
    }

    pub fn build_payload(request: &GenerationRequest) -> Result<Value> {
        let (width, height) = dimensions_for_hints(request.size_hint.as_deref(), request.ratio_hint.as_deref());
        let generation_config = json!({
            "numberOfImages": 1,
            "quality": "standard",
            "cfgScale": 8.0,
            "width": width,
            "height": height
        });

        let payload = match request.mode {
            GenerationMode::Generate => json!({
                "taskType": "TEXT_IMAGE",
                "textToImageParams": { "text": request.prompt },
                "imageGenerationConfig": generation_config
            }),
            GenerationMode::Recolor => {
                let reference = request.reference_image.as_ref().ok_or_else(|| {
                    PipelineError::ServiceError("Recolor request has no reference image".into())
                })?;
                json!({
                    "taskType": "IMAGE_VARIATION",
                    "imageVariationParams": {
                        "text": request.prompt,
                        "images": [STANDARD.encode(&reference.data)],
                        "similarityStrength": 1.0
                    },
                    "imageGenerationConfig": generation_config
                })
            }
        };
        Ok(payload)
    }

    pub fn parse_response(body: &[u8]) -> Result<ServiceResponse> {
        let titan_response: TitanImageResponse = serde_json::from_slice(body)
            .map_err(|e| PipelineError::ServiceError(format!("Unreadable response: {}", e)))?;

        let mut parts = Vec::new();
        if let Some(error) = titan_response.error.filter(|e| !e.is_empty()) {
            parts.push(ResponsePart::Text { text: error });
        }
        for encoded in titan_response.images {
            let data = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| PipelineError::ServiceError(format!("Image base64 decode failed: {}", e)))?;
            parts.push(ResponsePart::Image {
                data,
                mime_type: "image/png".to_string(),
            });
        }
        Ok(ServiceResponse::new(parts))
    }
}

/// Titan wants explicit pixel sizes in multiples of 64. The size hint picks the long edge
/// (`1K` = 1024, `2K` = 2048, or a plain number), the ratio hint the short edge.
fn dimensions_for_hints(size_hint: Option<&str>, ratio_hint: Option<&str>) -> (u32, u32) {
    let long_edge = match size_hint.map(|s| s.trim().to_ascii_lowercase()) {
        Some(s) if s == "2k" || s == "4k" => 2048,
        Some(s) => s.parse::<u32>().ok().filter(|n| *n >= 320).unwrap_or(1024).min(2048),
        None => 1024,
    };
    let (rw, rh) = ratio_hint
        .and_then(|r| r.split_once(':'))
        .and_then(|(w, h)| Some((w.trim().parse::<f64>().ok()?, h.trim().parse::<f64>().ok()?)))
        .filter(|(w, h)| *w > 0.0 && *h > 0.0)
        .unwrap_or((1.0, 1.0));

    let snap = |v: f64| ((v / 64.0).round() as u32).max(5) * 64;
    if rw >= rh {
        (snap(long_edge as f64), snap(long_edge as f64 * rh / rw))
    } else {
        (snap(long_edge as f64 * rw / rh), snap(long_edge as f64))
    }
}

#[async_trait]
impl ImageServiceClient for BedrockImageClient {
    fn name(&self) -> &str {
        "bedrock"
    }

    async fn send(&self, request: &GenerationRequest) -> Result<ServiceResponse> {
        let payload = Self::build_payload(request)?;
        let request_json = serde_json::to_string(&payload)?;

        log::info!("Generating image with model: {}", self.model_id);

        let response = self
            .client
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(request_json.into_bytes()))
            .send()
            .await
            .map_err(|e| {
                log::error!("AWS SDK image generation error details: {:?}", e);
                if let Some(service_error) = e.as_service_error() {
                    PipelineError::ServiceError(
                        service_error
                            .message()
                            .unwrap_or_else(|| service_error.code().unwrap_or("unknown"))
                            .to_string(),
                    )
                } else {
                    PipelineError::ServiceError(e.to_string())
                }
            })?;

        let response_bytes = response.body.into_inner();
        Self::parse_response(&response_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReferenceImage;

    #[test]
    fn hints_map_to_titan_dimensions() {
        assert_eq!(dimensions_for_hints(None, None), (1024, 1024));
        assert_eq!(dimensions_for_hints(Some("1K"), Some("16:9")), (1024, 576));
        assert_eq!(dimensions_for_hints(Some("2k"), Some("3:4")), (1536, 2048));
        assert_eq!(dimensions_for_hints(Some("768"), Some("nonsense")), (768, 768));
    }

    #[test]
    fn recolor_uses_image_variation() {
        let request = GenerationRequest::recolor("white bg", ReferenceImage::new(vec![1, 2, 3], "image/png"));
        let payload = BedrockImageClient::build_payload(&request).unwrap();
        assert_eq!(payload["taskType"], "IMAGE_VARIATION");
        assert_eq!(payload["imageVariationParams"]["images"][0], "AQID");
    }

    #[test]
    fn error_field_becomes_text_note() {
        let response = BedrockImageClient::parse_response(br#"{"images": [], "error": "content filtered"}"#).unwrap();
        assert_eq!(response.image_count(), 0);
        assert_eq!(response.text(), "content filtered");
    }
}
