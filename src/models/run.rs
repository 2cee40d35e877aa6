use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use super::artifact::{ArtifactRole, ImageArtifact};
use crate::error::{PipelineError, Result};

/// Run identifiers have one-second resolution; two runs started in the same second collide.
pub const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Init,
    BaseGenerated,
    WhiteComposited,
    BlackComposited,
    AlphaExtracted,
    Failed,
}

impl PipelineState {
    /// The only state reachable on success, or `None` from a terminal state.
    pub fn next(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Init => Some(PipelineState::BaseGenerated),
            PipelineState::BaseGenerated => Some(PipelineState::WhiteComposited),
            PipelineState::WhiteComposited => Some(PipelineState::BlackComposited),
            PipelineState::BlackComposited => Some(PipelineState::AlphaExtracted),
            PipelineState::AlphaExtracted | PipelineState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::AlphaExtracted | PipelineState::Failed)
    }

    /// Role of the artifact produced by entering this state.
    pub fn produced_role(&self) -> Option<ArtifactRole> {
        match self {
            PipelineState::BaseGenerated => Some(ArtifactRole::Base),
            PipelineState::WhiteComposited => Some(ArtifactRole::White),
            PipelineState::BlackComposited => Some(ArtifactRole::Black),
            PipelineState::AlphaExtracted => Some(ArtifactRole::Final),
            PipelineState::Init | PipelineState::Failed => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "init",
            PipelineState::BaseGenerated => "base-generated",
            PipelineState::WhiteComposited => "white-composited",
            PipelineState::BlackComposited => "black-composited",
            PipelineState::AlphaExtracted => "alpha-extracted",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFailure {
    /// State the run was in when the failing stage started.
    pub failed_from: PipelineState,
    pub error: PipelineError,
}

/// Bookkeeping for one invocation. Never persisted; the artifact files are the only output.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    run_id: String,
    started_at: DateTime<Local>,
    state: PipelineState,
    artifacts: Vec<ImageArtifact>,
    failure: Option<PipelineFailure>,
}

impl PipelineRun {
    pub fn new(started_at: DateTime<Local>) -> Self {
        Self {
            run_id: started_at.format(RUN_ID_FORMAT).to_string(),
            started_at,
            state: PipelineState::Init,
            artifacts: Vec::new(),
            failure: None,
        }
    }

    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::new(Local::now())
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn artifacts(&self) -> &[ImageArtifact] {
        &self.artifacts
    }

    pub fn artifact(&self, role: ArtifactRole) -> Option<&ImageArtifact> {
        self.artifacts.iter().find(|artifact| artifact.role == role)
    }

    pub fn failure(&self) -> Option<&PipelineFailure> {
        self.failure.as_ref()
    }

    pub fn final_path(&self) -> Option<&Path> {
        self.artifact(ArtifactRole::Final)
            .map(|artifact| artifact.path.as_path())
    }

    pub fn status(&self) -> RunStatus {
        match self.state {
            PipelineState::AlphaExtracted => RunStatus::Succeeded,
            PipelineState::Failed => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }

    /// Errors unless the run is in `expected`, so stages cannot be skipped or repeated.
    pub fn ensure_state(&self, expected: PipelineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::StateError(format!(
                "run {} is {}, stage requires {}",
                self.run_id, self.state, expected
            )))
        }
    }

    /// Move to the next linear state, recording the artifact that stage produced.
    pub fn advance(&mut self, artifact: ImageArtifact) -> Result<PipelineState> {
        let next = self.state.next().ok_or_else(|| {
            PipelineError::StateError(format!("run {} is already {}", self.run_id, self.state))
        })?;
        if next.produced_role() != Some(artifact.role) {
            return Err(PipelineError::StateError(format!(
                "{} artifact cannot move run {} from {} to {}",
                artifact.role, self.run_id, self.state, next
            )));
        }
        self.artifacts.push(artifact);
        self.state = next;
        Ok(next)
    }

    /// Enter `Failed`. A run that already reached a terminal state keeps it.
    pub fn fail(&mut self, error: PipelineError) {
        if self.state.is_terminal() {
            return;
        }
        self.failure = Some(PipelineFailure {
            failed_from: self.state,
            error,
        });
        self.state = PipelineState::Failed;
    }

    pub fn into_result(self) -> Result<ImageArtifact> {
        match self.state {
            PipelineState::AlphaExtracted => self
                .artifacts
                .into_iter()
                .find(|artifact| artifact.role == ArtifactRole::Final)
                .ok_or_else(|| {
                    PipelineError::StateError("finished run has no final artifact".into())
                }),
            PipelineState::Failed => Err(self
                .failure
                .map(|failure| failure.error)
                .unwrap_or_else(|| PipelineError::StateError("failed run lost its error".into()))),
            state => Err(PipelineError::StateError(format!(
                "run {} stopped before completion in state {}",
                self.run_id, state
            ))),
        }
    }
}
