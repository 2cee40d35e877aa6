use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::alpha::{AlphaOptions, AlphaThresholds, BackdropModel};
use crate::error::{PipelineError, Result};

pub const DEFAULT_PREFIX: &str = "transparent";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Everything the orchestrator needs, already resolved.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_root: Option<PathBuf>,
    pub prefix: String,
    pub scratch_dir: PathBuf,
    pub default_size_hint: Option<String>,
    pub default_ratio_hint: Option<String>,
    pub alpha: AlphaOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            output_root: None,
            prefix: DEFAULT_PREFIX.to_string(),
            scratch_dir: env::temp_dir(),
            default_size_hint: None,
            default_ratio_hint: None,
            alpha: AlphaOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `ALPHAGEN_OUTPUT_DIR`, `ALPHAGEN_PREFIX`, `ALPHAGEN_SCRATCH_DIR`,
    /// `ALPHAGEN_SIZE`, `ALPHAGEN_RATIO`, `ALPHAGEN_SAMPLED_BACKDROP` and `ALPHAGEN_CLEANUP`.
    pub fn from_env() -> Self {
        let output_root = non_empty_env("ALPHAGEN_OUTPUT_DIR").map(PathBuf::from);
        let prefix = non_empty_env("ALPHAGEN_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        let scratch_dir = non_empty_env("ALPHAGEN_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let default_size_hint = non_empty_env("ALPHAGEN_SIZE");
        let default_ratio_hint = non_empty_env("ALPHAGEN_RATIO");

        let mut alpha = AlphaOptions::default();
        if env_flag("ALPHAGEN_SAMPLED_BACKDROP") {
            alpha.backdrop = BackdropModel::sampled();
        }
        if env_flag("ALPHAGEN_CLEANUP") {
            alpha.thresholds = Some(AlphaThresholds::default());
        }

        PipelineConfig {
            output_root,
            prefix,
            scratch_dir,
            default_size_hint,
            default_ratio_hint,
            alpha,
        }
    }

    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(output_root.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn with_default_hints(mut self, size_hint: Option<String>, ratio_hint: Option<String>) -> Self {
        self.default_size_hint = size_hint;
        self.default_ratio_hint = ratio_hint;
        self
    }

    pub fn with_alpha_options(mut self, alpha: AlphaOptions) -> Self {
        self.alpha = alpha;
        self
    }

    /// Checks required setup. Nothing is written before this passes.
    pub fn validate(&self) -> Result<PathBuf> {
        let output_root = self.output_root.clone().ok_or_else(|| {
            PipelineError::ConfigurationError(
                "No output directory configured (set ALPHAGEN_OUTPUT_DIR)".into(),
            )
        })?;
        if output_root.is_file() {
            return Err(PipelineError::ConfigurationError(format!(
                "Output path {} is a file, not a directory",
                output_root.display()
            )));
        }
        let prefix = self.prefix.trim();
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(PipelineError::ConfigurationError(format!(
                "Invalid artifact prefix '{}'",
                self.prefix
            )));
        }
        self.alpha.validate()?;
        Ok(output_root)
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Option<Duration>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl GeminiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `ConfigurationError` when `GEMINI_TIMEOUT_SECS` is set but not a
    /// positive whole number of seconds.
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"));
        let model = non_empty_env("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        let api_base =
            non_empty_env("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        let timeout = match non_empty_env("GEMINI_TIMEOUT_SECS") {
            Some(raw) => parse_timeout_secs(&raw)?,
            None => Duration::from_secs(120),
        };

        Ok(GeminiConfig {
            api_key,
            model,
            api_base,
            timeout: Some(timeout),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(feature = "bedrock")]
#[derive(Debug, Clone, Default)]
pub struct BedrockConfig {
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub model_id: Option<String>,
}

#[cfg(feature = "bedrock")]
impl BedrockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        BedrockConfig {
            region: non_empty_env("AWS_REGION").or_else(|| non_empty_env("AWS_DEFAULT_REGION")),
            access_key: non_empty_env("AWS_ACCESS_KEY_ID"),
            secret_key: non_empty_env("AWS_SECRET_ACCESS_KEY"),
            model_id: non_empty_env("BEDROCK_IMAGE_MODEL"),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// Hands the orchestrator a resolved configuration. Discovery (environment, settings
/// files in ancestor directories) happens here, never in the pipeline.
pub trait ConfigResolver {
    fn resolve(&self) -> Result<PipelineConfig>;
}

/// Loads `.env` (searched upward from the working directory), then reads the environment.
#[derive(Debug, Clone, Default)]
pub struct EnvConfigResolver;

impl ConfigResolver for EnvConfigResolver {
    fn resolve(&self) -> Result<PipelineConfig> {
        match dotenv::dotenv() {
            Ok(path) => log::debug!("Loaded environment from {}", path.display()),
            Err(_) => log::debug!("No .env file found, using process environment"),
        }
        Ok(PipelineConfig::from_env())
    }
}

/// Returns a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigResolver(pub PipelineConfig);

impl ConfigResolver for StaticConfigResolver {
    fn resolve(&self) -> Result<PipelineConfig> {
        Ok(self.0.clone())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_timeout_secs(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(PipelineError::ConfigurationError(format!(
            "GEMINI_TIMEOUT_SECS must be a positive number of seconds, got '{}'",
            raw
        ))),
    }
}

fn env_flag(key: &str) -> bool {
    non_empty_env(key).map_or(false, |val| val == "true" || val == "1")
}
