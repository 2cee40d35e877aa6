//! The image service capability. Every stage of the pipeline goes through one
//! [`ImageServiceClient`], so a test double can stand in for all three calls.

#[cfg(feature = "bedrock")]
pub mod bedrock;
pub mod gemini;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{GenerationRequest, ServiceResponse};

#[cfg(feature = "bedrock")]
pub use bedrock::BedrockImageClient;
pub use gemini::GeminiClient;

#[async_trait]
pub trait ImageServiceClient: Send + Sync {
    fn name(&self) -> &str;

    /// One request, one response. Implementations must not retry; a failed call is
    /// reported as [`crate::PipelineError::ServiceError`] carrying the upstream message.
    /// A response without images is `Ok`.
    async fn send(&self, request: &GenerationRequest) -> Result<ServiceResponse>;
}

#[async_trait]
impl<T: ImageServiceClient + ?Sized> ImageServiceClient for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&self, request: &GenerationRequest) -> Result<ServiceResponse> {
        (**self).send(request).await
    }
}

#[async_trait]
impl<T: ImageServiceClient + ?Sized> ImageServiceClient for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&self, request: &GenerationRequest) -> Result<ServiceResponse> {
        (**self).send(request).await
    }
}
