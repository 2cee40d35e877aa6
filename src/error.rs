use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// The external call failed. The detail is the upstream message, untouched.
    #[error("Service error: {0}")]
    ServiceError(String),
    /// The call succeeded but returned no inline image. Carries the text notes, if any.
    #[error("No image in response: {0}")]
    NoImageInResponse(String),
    #[error("Dimension mismatch: white is {white_width}x{white_height}, black is {black_width}x{black_height}")]
    DimensionMismatch {
        white_width: u32,
        white_height: u32,
        black_width: u32,
        black_height: u32,
    },
    #[error("Invalid state transition: {0}")]
    StateError(String),
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl PipelineError {
    /// The raw detail without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            PipelineError::ConfigurationError(msg)
            | PipelineError::ServiceError(msg)
            | PipelineError::NoImageInResponse(msg)
            | PipelineError::StateError(msg)
            | PipelineError::ImageError(msg)
            | PipelineError::IoError(msg)
            | PipelineError::SerializationError(msg) => msg.clone(),
            PipelineError::DimensionMismatch { .. } => self.to_string(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::ImageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
