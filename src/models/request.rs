use serde::{Deserialize, Serialize};

use super::common::base64_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Generate,
    Recolor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }
}

/// One call to the image service. Built per stage and dropped when the stage ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub mode: GenerationMode,
    pub reference_image: Option<ReferenceImage>,
    pub size_hint: Option<String>,
    pub ratio_hint: Option<String>,
}

impl GenerationRequest {
    pub fn generate(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            mode: GenerationMode::Generate,
            reference_image: None,
            size_hint: None,
            ratio_hint: None,
        }
    }

    pub fn recolor(prompt: impl Into<String>, reference: ReferenceImage) -> Self {
        Self {
            prompt: prompt.into(),
            mode: GenerationMode::Recolor,
            reference_image: Some(reference),
            size_hint: None,
            ratio_hint: None,
        }
    }

    pub fn with_hints(mut self, size_hint: Option<String>, ratio_hint: Option<String>) -> Self {
        self.size_hint = size_hint;
        self.ratio_hint = ratio_hint;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponsePart {
    Text {
        text: String,
    },
    Image {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        mime_type: String,
    },
}

/// Ordered parts returned by the service. Zero image parts is a valid response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub parts: Vec<ResponsePart>,
}

impl ServiceResponse {
    pub fn new(parts: Vec<ResponsePart>) -> Self {
        Self { parts }
    }

    pub fn first_image(&self) -> Option<(&[u8], &str)> {
        self.parts.iter().find_map(|part| match part {
            ResponsePart::Image { data, mime_type } => Some((data.as_slice(), mime_type.as_str())),
            ResponsePart::Text { .. } => None,
        })
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, ResponsePart::Image { .. }))
            .count()
    }

    /// All text notes joined with newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ResponsePart::Text { text } => Some(text.as_str()),
                ResponsePart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
