use alphagen::{
    config::StaticConfigResolver, extract_alpha_files, AlphaOptions, ArtifactRole, Backdrop,
    GenerationMode, GenerationRequest, ImageServiceClient, PipelineConfig, PipelineError,
    PipelineOrchestrator, PipelineState, ResponsePart, RunStatus, ServiceResponse,
};
use async_trait::async_trait;
use image::{ImageOutputFormat, Rgb, RgbImage};
use std::collections::VecDeque;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Replays canned responses in order and records every request it receives.
#[derive(Default)]
struct ScriptedService {
    responses: Mutex<VecDeque<alphagen::Result<ServiceResponse>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedService {
    fn new(responses: Vec<alphagen::Result<ServiceResponse>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageServiceClient for ScriptedService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: &GenerationRequest) -> alphagen::Result<ServiceResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::ServiceError("script exhausted".into())))
    }
}

struct Workspace {
    output: TempDir,
    scratch: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            output: tempfile::tempdir().unwrap(),
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig::new()
            .with_output_root(self.output.path())
            .with_scratch_dir(self.scratch.path())
            .with_prefix("sprite")
    }

    fn output_files(&self) -> Vec<String> {
        list(self.output.path())
    }

    fn scratch_files(&self) -> Vec<String> {
        list(self.scratch.path())
    }
}

fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

fn image_response(bytes: Vec<u8>) -> alphagen::Result<ServiceResponse> {
    Ok(ServiceResponse::new(vec![ResponsePart::Image {
        data: bytes,
        mime_type: "image/png".into(),
    }]))
}

/// 8-bit composite of `fg` at coverage `a` over a backdrop level.
fn composite(fg: [f64; 3], a: f64, backdrop: f64) -> [u8; 3] {
    fg.map(|c| (c * a + backdrop * (1.0 - a)).round() as u8)
}

#[tokio::test]
async fn half_covered_region_round_trips_through_all_stages() {
    let ws = Workspace::new();
    let fg = [200.0, 100.0, 50.0];
    let white = composite(fg, 0.5, 255.0);
    let black = composite(fg, 0.5, 0.0);
    assert_eq!(white, [228, 178, 153]);
    assert_eq!(black, [100, 50, 25]);

    let base_png = png(64, 64, [200, 100, 50]);
    let service = ScriptedService::new(vec![
        image_response(base_png.clone()),
        image_response(png(64, 64, white)),
        image_response(png(64, 64, black)),
    ]);
    let config = ws
        .config()
        .with_default_hints(Some("1K".into()), Some("1:1".into()));
    let orchestrator = PipelineOrchestrator::new(service.clone(), config).unwrap();

    let run = orchestrator.run("a red sticker", None, Some("4:3")).await;
    assert_eq!(run.status(), RunStatus::Succeeded);
    assert_eq!(run.state(), PipelineState::AlphaExtracted);
    assert_eq!(run.artifacts().len(), 4);

    let final_path = run.final_path().unwrap().to_path_buf();
    assert_eq!(
        final_path,
        ws.output.path().join(format!("sprite_{}.png", run.run_id()))
    );
    let id = run.run_id();
    assert_eq!(
        ws.output_files(),
        vec![
            format!("sprite_{}.png", id),
            format!("sprite_{}_base.png", id),
            format!("sprite_{}_black.png", id),
            format!("sprite_{}_white.png", id),
        ]
    );
    assert!(ws.scratch_files().is_empty());

    let rgba = image::open(&final_path).unwrap().to_rgba8();
    assert_eq!(rgba.dimensions(), (64, 64));
    for px in rgba.pixels() {
        let [r, g, b, a] = px.0;
        assert!((a as i32 - 127).abs() <= 2, "alpha {}", a);
        assert!((r as i32 - 200).abs() <= 2, "red {}", r);
        assert!((g as i32 - 100).abs() <= 2, "green {}", g);
        assert!((b as i32 - 50).abs() <= 2, "blue {}", b);
    }

    let requests = service.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].mode, GenerationMode::Generate);
    assert_eq!(requests[0].prompt, "a red sticker");
    assert!(requests[0].reference_image.is_none());
    assert_eq!(requests[0].size_hint.as_deref(), Some("1K"));
    assert_eq!(requests[0].ratio_hint.as_deref(), Some("4:3"));
    for (request, backdrop) in requests[1..].iter().zip(["white", "black"]) {
        assert_eq!(request.mode, GenerationMode::Recolor);
        assert!(request.prompt.contains(backdrop));
        assert!(request.prompt.contains("pixel-identical"));
        // both recolors start from the base render
        assert_eq!(request.reference_image.as_ref().unwrap().data, base_png);
    }
}

/// Serves a fixed image and, on every call, checks what the orchestrator has staged in
/// the scratch directory. Optionally swaps the scratch directory for a plain file while
/// the call is in flight.
struct ScratchWatchingService {
    scratch: PathBuf,
    image: Vec<u8>,
    block_scratch: bool,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageServiceClient for ScratchWatchingService {
    fn name(&self) -> &str {
        "scratch-watching"
    }

    async fn send(&self, request: &GenerationRequest) -> alphagen::Result<ServiceResponse> {
        let staged = list(&self.scratch);
        assert_eq!(staged.len(), 1, "expected only the request payload, got {:?}", staged);
        let name = &staged[0];
        assert!(name.starts_with("sprite_") && name.contains("_request_") && name.ends_with(".json"));

        let payload: GenerationRequest =
            serde_json::from_slice(&fs::read(self.scratch.join(name)).unwrap()).unwrap();
        assert_eq!(payload.prompt, request.prompt);
        assert_eq!(payload.mode, request.mode);
        assert_eq!(payload.reference_image, request.reference_image);
        self.seen.lock().unwrap().push(name.clone());

        if self.block_scratch {
            fs::remove_dir_all(&self.scratch).unwrap();
            fs::write(&self.scratch, b"not a directory").unwrap();
        }
        image_response(self.image.clone())
    }
}

#[tokio::test]
async fn each_call_stages_its_request_and_response_in_scratch() {
    let ws = Workspace::new();
    let service = Arc::new(ScratchWatchingService {
        scratch: ws.scratch.path().to_path_buf(),
        image: png(4, 4, [255, 255, 255]),
        block_scratch: false,
        seen: Mutex::new(Vec::new()),
    });
    let orchestrator = PipelineOrchestrator::new(service.clone(), ws.config()).unwrap();

    let run = orchestrator.run("a coin", None, None).await;
    assert_eq!(run.status(), RunStatus::Succeeded);

    let seen = service.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for (name, role) in seen.iter().zip(["base", "white", "black"]) {
        let stem = format!("sprite_{}_{}_request_", run.run_id(), role);
        assert!(name.starts_with(&stem), "{} should start with {}", name, stem);
    }
    assert!(ws.scratch_files().is_empty());
}

#[tokio::test]
async fn unwritable_response_payload_fails_the_stage() {
    let ws = Workspace::new();
    let scratch = ws.scratch.path().join("staging");
    fs::create_dir_all(&scratch).unwrap();
    let service = Arc::new(ScratchWatchingService {
        scratch: scratch.clone(),
        image: png(4, 4, [9, 9, 9]),
        block_scratch: true,
        seen: Mutex::new(Vec::new()),
    });
    let config = ws.config().with_scratch_dir(&scratch);
    let orchestrator = PipelineOrchestrator::new(service.clone(), config).unwrap();

    let run = orchestrator.run("a coin", None, None).await;
    let failure = run.failure().unwrap();
    assert_eq!(failure.failed_from, PipelineState::Init);
    assert!(matches!(failure.error, PipelineError::IoError(_)));
    assert_eq!(service.seen.lock().unwrap().len(), 1);
    // the image is only persisted after its response payload is staged
    assert!(ws.output_files().is_empty());
}

#[tokio::test]
async fn text_only_first_response_halts_after_stage_one() {
    let ws = Workspace::new();
    let service = ScriptedService::new(vec![Ok(ServiceResponse::new(vec![ResponsePart::Text {
        text: "I can't generate that image.".into(),
    }]))]);
    let orchestrator = PipelineOrchestrator::new(service.clone(), ws.config()).unwrap();

    let run = orchestrator.run("something odd", None, None).await;
    assert_eq!(run.state(), PipelineState::Failed);
    let failure = run.failure().unwrap();
    assert_eq!(failure.failed_from, PipelineState::Init);
    assert_eq!(
        failure.error,
        PipelineError::NoImageInResponse("I can't generate that image.".into())
    );
    assert!(run.artifacts().is_empty());

    assert_eq!(service.requests().len(), 1);
    assert!(ws.output_files().is_empty());
    assert!(ws.scratch_files().is_empty());
}

#[tokio::test]
async fn service_error_surfaces_verbatim_and_keeps_earlier_artifacts() {
    let ws = Workspace::new();
    let service = ScriptedService::new(vec![
        image_response(png(8, 8, [10, 20, 30])),
        Err(PipelineError::ServiceError("429 RESOURCE_EXHAUSTED: quota".into())),
    ]);
    let orchestrator = PipelineOrchestrator::new(service.clone(), ws.config()).unwrap();

    let err = orchestrator
        .produce_transparent_image("a lamp", None, None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PipelineError::ServiceError("429 RESOURCE_EXHAUSTED: quota".into())
    );
    assert_eq!(err.detail(), "429 RESOURCE_EXHAUSTED: quota");

    assert_eq!(service.requests().len(), 2);
    let files = ws.output_files();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("_base.png"));
    assert!(ws.scratch_files().is_empty());
}

#[tokio::test]
async fn mismatched_renders_fail_without_final_artifact() {
    let ws = Workspace::new();
    let service = ScriptedService::new(vec![
        image_response(png(10, 10, [0, 0, 0])),
        image_response(png(10, 10, [255, 255, 255])),
        image_response(png(10, 11, [0, 0, 0])),
    ]);
    let orchestrator = PipelineOrchestrator::new(service, ws.config()).unwrap();

    let run = orchestrator.run("a cube", None, None).await;
    let failure = run.failure().unwrap();
    assert_eq!(failure.failed_from, PipelineState::BlackComposited);
    assert_eq!(
        failure.error,
        PipelineError::DimensionMismatch {
            white_width: 10,
            white_height: 10,
            black_width: 10,
            black_height: 11,
        }
    );
    assert!(run.final_path().is_none());

    let files = ws.output_files();
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|name| !name.ends_with(&format!("{}.png", run.run_id()))));
}

#[tokio::test]
async fn stages_cannot_run_out_of_order() {
    let ws = Workspace::new();
    let service = ScriptedService::new(vec![image_response(png(4, 4, [1, 2, 3]))]);
    let orchestrator = PipelineOrchestrator::new(service.clone(), ws.config()).unwrap();
    let mut run = orchestrator.begin_run();

    let base = alphagen::ImageArtifact {
        data: png(4, 4, [1, 2, 3]),
        mime_type: "image/png".into(),
        role: ArtifactRole::Base,
        created_at: chrono::Utc::now(),
        path: PathBuf::from("unused.png"),
    };
    let err = orchestrator
        .recolor(&mut run, &base, Backdrop::Black, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::StateError(_)));
    assert_eq!(run.state(), PipelineState::Init);
    assert!(service.requests().is_empty());

    let generated = orchestrator
        .generate_base(&mut run, "dot", None, None)
        .await
        .unwrap();
    assert_eq!(run.state(), PipelineState::BaseGenerated);
    assert!(generated.path.exists());
    assert!(orchestrator.extract_alpha(&mut run, &generated, &generated).is_err());
    assert_eq!(run.state(), PipelineState::BaseGenerated);
}

#[test]
fn missing_output_root_is_rejected_before_any_stage() {
    let service = ScriptedService::new(vec![]);
    let resolver = StaticConfigResolver(PipelineConfig::new());
    let result = PipelineOrchestrator::from_resolver(service.clone(), &resolver);
    assert!(matches!(result, Err(PipelineError::ConfigurationError(_))));
    assert!(service.requests().is_empty());
}

#[test]
fn retained_pair_can_be_finished_by_hand() {
    let dir = tempfile::tempdir().unwrap();
    let white = dir.path().join("w.png");
    let black = dir.path().join("b.png");
    fs::write(&white, png(6, 6, [255, 255, 255])).unwrap();
    fs::write(&black, png(6, 6, [0, 0, 0])).unwrap();

    let output = dir.path().join("out").join("final.png");
    let stats = extract_alpha_files(&white, &black, &output, &AlphaOptions::default()).unwrap();
    assert_eq!(stats.transparent, 36);

    let rgba = image::open(&output).unwrap().to_rgba8();
    assert!(rgba.pixels().all(|px| px.0[3] == 0));

    let short = dir.path().join("short.png");
    fs::write(&short, png(6, 5, [0, 0, 0])).unwrap();
    let err = extract_alpha_files(&white, &short, &dir.path().join("x.png"), &AlphaOptions::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    assert!(!dir.path().join("x.png").exists());
}
