//! Transparent-background image generation.
//!
//! An [`ImageServiceClient`] renders a subject from a prompt, then re-renders that image over
//! pure white and pure black. [`alpha::extract`] recovers coverage and unpremultiplied color
//! from the pair, and the [`PipelineOrchestrator`] ties the four stages together.

pub mod alpha;
pub mod artifacts;
pub mod codec;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod pipeline;
pub mod service;

pub use alpha::{AlphaOptions, AlphaStats, AlphaThresholds, BackdropModel, PixelBuffer, RgbaBuffer};
#[cfg(feature = "bedrock")]
pub use config::BedrockConfig;
pub use config::{ConfigResolver, EnvConfigResolver, GeminiConfig, PipelineConfig, StaticConfigResolver};
pub use error::{PipelineError, Result};
pub use models::{
    ArtifactRole, GenerationMode, GenerationRequest, ImageArtifact, PipelineRun, PipelineState,
    ReferenceImage, ResponsePart, RunStatus, ServiceResponse,
};
pub use pipeline::{extract_alpha_files, Backdrop, PipelineOrchestrator};
#[cfg(feature = "bedrock")]
pub use service::BedrockImageClient;
pub use service::{GeminiClient, ImageServiceClient};
