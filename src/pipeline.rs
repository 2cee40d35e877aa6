//! The four-stage transparent image pipeline.
//!
//! `Init → BaseGenerated → WhiteComposited → BlackComposited → AlphaExtracted`, or `Failed`
//! from any non-terminal state. Each stage consumes the previous stage's artifact, so stages
//! run strictly one after another and at most one service call is in flight per run. There
//! are no retries: the first failure ends the run and is returned as-is. Artifacts already
//! written stay on disk so the run can be inspected or finished by hand.
//!
//! [`PipelineOrchestrator::run`] tags log lines with the run id through a process-wide
//! logger setting, so concurrent runs in one process tag each other's lines.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

use crate::alpha::{self, AlphaOptions, AlphaStats};
use crate::artifacts::{ArtifactStore, ScratchSpace};
use crate::codec;
use crate::config::{ConfigResolver, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::logger;
use crate::models::{
    ArtifactRole, GenerationRequest, ImageArtifact, PipelineRun, PipelineState, ReferenceImage,
};
use crate::service::ImageServiceClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backdrop {
    White,
    Black,
}

impl Backdrop {
    pub fn role(&self) -> ArtifactRole {
        match self {
            Backdrop::White => ArtifactRole::White,
            Backdrop::Black => ArtifactRole::Black,
        }
    }

    /// State the run must be in before this recolor may start.
    pub fn required_state(&self) -> PipelineState {
        match self {
            Backdrop::White => PipelineState::BaseGenerated,
            Backdrop::Black => PipelineState::WhiteComposited,
        }
    }

    pub fn instruction(&self) -> String {
        let (name, hex) = match self {
            Backdrop::White => ("white", "#FFFFFF"),
            Backdrop::Black => ("black", "#000000"),
        };
        format!(
            "Change only the background to pure solid {} ({}). Do not move, resize, rotate, \
             or otherwise alter the subject in any way; keep it pixel-identical to the input image.",
            name, hex
        )
    }
}

pub struct PipelineOrchestrator<C> {
    client: C,
    config: PipelineConfig,
    output_root: PathBuf,
    scratch: ScratchSpace,
}

impl<C: ImageServiceClient> PipelineOrchestrator<C> {
    /// Fails with `ConfigurationError` before anything is written if setup is incomplete.
    pub fn new(client: C, config: PipelineConfig) -> Result<Self> {
        let output_root = config.validate()?;
        let scratch = ScratchSpace::new(config.scratch_dir.clone(), config.prefix.clone());
        Ok(Self {
            client,
            config,
            output_root,
            scratch,
        })
    }

    pub fn from_resolver(client: C, resolver: &dyn ConfigResolver) -> Result<Self> {
        Self::new(client, resolver.resolve()?)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn begin_run(&self) -> PipelineRun {
        PipelineRun::new(Local::now())
    }

    fn store(&self, run: &PipelineRun) -> ArtifactStore {
        ArtifactStore::new(&self.output_root, &self.config.prefix, run.run_id())
    }

    fn hints(&self, size_hint: Option<&str>, ratio_hint: Option<&str>) -> (Option<String>, Option<String>) {
        (
            size_hint
                .map(str::to_string)
                .or_else(|| self.config.default_size_hint.clone()),
            ratio_hint
                .map(str::to_string)
                .or_else(|| self.config.default_ratio_hint.clone()),
        )
    }

    /// Stage 1: render the subject from the prompt.
    pub async fn generate_base(
        &self,
        run: &mut PipelineRun,
        prompt: &str,
        size_hint: Option<&str>,
        ratio_hint: Option<&str>,
    ) -> Result<ImageArtifact> {
        run.ensure_state(PipelineState::Init)?;
        let (size, ratio) = self.hints(size_hint, ratio_hint);
        let request = GenerationRequest::generate(prompt).with_hints(size, ratio);

        log::info!("🎨 Generating base image");
        let result = self.call_service(run, ArtifactRole::Base, &request).await;
        Self::settle(run, result)
    }

    /// Stages 2 and 3: re-render `source` over a solid backdrop.
    pub async fn recolor(
        &self,
        run: &mut PipelineRun,
        source: &ImageArtifact,
        backdrop: Backdrop,
        size_hint: Option<&str>,
        ratio_hint: Option<&str>,
    ) -> Result<ImageArtifact> {
        run.ensure_state(backdrop.required_state())?;
        let (size, ratio) = self.hints(size_hint, ratio_hint);
        let reference = ReferenceImage::new(source.data.clone(), source.mime_type.clone());
        let request = GenerationRequest::recolor(backdrop.instruction(), reference).with_hints(size, ratio);

        log::info!(
            "🖌️  Recoloring {} onto {} backdrop",
            source.path.display(),
            backdrop.role()
        );
        let result = self.call_service(run, backdrop.role(), &request).await;
        Self::settle(run, result)
    }

    /// Stage 4: reconstruct alpha from the white/black pair and write the final PNG.
    pub fn extract_alpha(
        &self,
        run: &mut PipelineRun,
        white: &ImageArtifact,
        black: &ImageArtifact,
    ) -> Result<ImageArtifact> {
        run.ensure_state(PipelineState::BlackComposited)?;
        let result = self.extract_and_persist(run, white, black);
        Self::settle(run, result)
    }

    /// Run every stage in order. The returned run is always terminal.
    pub async fn run(
        &self,
        prompt: &str,
        size_hint: Option<&str>,
        ratio_hint: Option<&str>,
    ) -> PipelineRun {
        let mut run = self.begin_run();
        logger::set_run_id(Some(run.run_id()));
        log::info!("🚀 Pipeline run {} started via {}", run.run_id(), self.client.name());

        match self.drive(&mut run, prompt, size_hint, ratio_hint).await {
            Ok(artifact) => log::info!("✅ Transparent image ready: {}", artifact.path.display()),
            Err(e) => {
                // only a state error can leave the run non-terminal here
                run.fail(e);
                log::error!(
                    "❌ Pipeline halted; {} artifact(s) kept for inspection",
                    run.artifacts().len()
                );
            }
        }

        logger::set_run_id(None);
        run
    }

    /// Caller-facing entry point: the path of the final artifact, or the first failure.
    pub async fn produce_transparent_image(
        &self,
        prompt: &str,
        size_hint: Option<&str>,
        ratio_hint: Option<&str>,
    ) -> Result<PathBuf> {
        self.run(prompt, size_hint, ratio_hint)
            .await
            .into_result()
            .map(|artifact| artifact.path)
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        prompt: &str,
        size_hint: Option<&str>,
        ratio_hint: Option<&str>,
    ) -> Result<ImageArtifact> {
        let base = self.generate_base(run, prompt, size_hint, ratio_hint).await?;
        let white = self
            .recolor(run, &base, Backdrop::White, size_hint, ratio_hint)
            .await?;
        let black = self
            .recolor(run, &base, Backdrop::Black, size_hint, ratio_hint)
            .await?;
        self.extract_alpha(run, &white, &black)
    }

    /// One service round trip. Both scratch payloads are dropped, and so deleted, on
    /// every return path out of this function.
    async fn call_service(
        &self,
        run: &PipelineRun,
        role: ArtifactRole,
        request: &GenerationRequest,
    ) -> Result<ImageArtifact> {
        let _timer = logger::stage_timer(role.as_str());
        let _request_payload = self
            .scratch
            .write_json(&format!("{}_{}_request", run.run_id(), role), request)?;

        let response = self.client.send(request).await?;
        let _response_payload = self
            .scratch
            .write_json(&format!("{}_{}_response", run.run_id(), role), &response)?;

        let (data, mime_type) = response.first_image().ok_or_else(|| {
            let text = response.text();
            PipelineError::NoImageInResponse(if text.is_empty() {
                "response contained no image".to_string()
            } else {
                text
            })
        })?;
        if response.image_count() > 1 {
            log::debug!("Response held {} images; keeping the first", response.image_count());
        }
        let note = response.text();
        if !note.is_empty() {
            log::info!("📝 Service note: {}", note);
        }

        self.store(run).persist(role, data.to_vec(), mime_type)
    }

    fn extract_and_persist(
        &self,
        run: &PipelineRun,
        white: &ImageArtifact,
        black: &ImageArtifact,
    ) -> Result<ImageArtifact> {
        let _timer = logger::stage_timer("extract");
        let white_pixels = codec::decode_rgb(&white.data)?;
        let black_pixels = codec::decode_rgb(&black.data)?;

        let extracted = alpha::extract(&white_pixels, &black_pixels, &self.config.alpha)?;
        log_stats(&extracted.stats);

        let png = codec::encode_png(&extracted.image)?;
        self.store(run)
            .persist(ArtifactRole::Final, png, codec::PNG_MIME)
    }

    fn settle(run: &mut PipelineRun, result: Result<ImageArtifact>) -> Result<ImageArtifact> {
        match result {
            Ok(artifact) => {
                run.advance(artifact.clone())?;
                Ok(artifact)
            }
            Err(e) => {
                log::error!("❌ Stage failed in state {}: {}", run.state(), e);
                run.fail(e.clone());
                Err(e)
            }
        }
    }
}

fn log_stats(stats: &AlphaStats) {
    let total = stats.total();
    log::info!(
        "📊 Alpha: transparent={:.1}%, opaque={:.1}%, edge={:.1}%",
        AlphaStats::fraction(stats.transparent, total) * 100.0,
        AlphaStats::fraction(stats.opaque, total) * 100.0,
        AlphaStats::fraction(stats.edge, total) * 100.0
    );
}

/// Finish a run by hand from retained white/black files. Overwrites `output`.
pub fn extract_alpha_files(
    white: &Path,
    black: &Path,
    output: &Path,
    options: &AlphaOptions,
) -> Result<AlphaStats> {
    let white_pixels = codec::decode_rgb(&fs::read(white)?)?;
    let black_pixels = codec::decode_rgb(&fs::read(black)?)?;

    let extracted = alpha::extract(&white_pixels, &black_pixels, options)?;
    log_stats(&extracted.stats);

    let png = codec::encode_png(&extracted.image)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, png)?;
    log::info!("💾 Saved: {}", output.display());
    Ok(extracted.stats)
}
