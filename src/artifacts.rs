//! Artifact files and scratch payloads.
//!
//! Artifacts are written once with create-new semantics and never touched again, so the
//! output directory only grows. Scratch payloads live in [`ScratchPayload`] guards and are
//! removed when the guard drops, whichever way the stage exits.

use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};
use crate::models::{extension_for_mime, ArtifactRole, ImageArtifact};

/// Names and writes the retained artifacts of one run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_root: PathBuf,
    prefix: String,
    run_id: String,
}

impl ArtifactStore {
    pub fn new(output_root: impl Into<PathBuf>, prefix: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            output_root: output_root.into(),
            prefix: prefix.into(),
            run_id: run_id.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// `<prefix>_<runId>[_<role>].<ext>`; the final artifact has no role suffix.
    pub fn file_name(&self, role: ArtifactRole, extension: &str) -> String {
        match role.suffix() {
            Some(suffix) => format!("{}_{}_{}.{}", self.prefix, self.run_id, suffix, extension),
            None => format!("{}_{}.{}", self.prefix, self.run_id, extension),
        }
    }

    pub fn path_for(&self, role: ArtifactRole, extension: &str) -> PathBuf {
        self.output_root.join(self.file_name(role, extension))
    }

    /// Write `data` as the artifact for `role`. An existing file is never overwritten.
    pub fn persist(&self, role: ArtifactRole, data: Vec<u8>, mime_type: &str) -> Result<ImageArtifact> {
        fs::create_dir_all(&self.output_root)?;
        let path = self.path_for(role, extension_for_mime(mime_type));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => PipelineError::IoError(format!(
                    "artifact {} already exists; another run used id {}",
                    path.display(),
                    self.run_id
                )),
                _ => PipelineError::IoError(format!("failed to create {}: {}", path.display(), e)),
            })?;
        file.write_all(&data)?;
        file.sync_all()?;

        log::info!("💾 Saved {} artifact: {}", role, path.display());
        Ok(ImageArtifact {
            data,
            mime_type: mime_type.to_string(),
            role,
            created_at: Utc::now(),
            path,
        })
    }
}

/// A transient payload file, deleted when dropped.
#[derive(Debug)]
pub struct ScratchPayload {
    file: NamedTempFile,
}

impl ScratchPayload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Where request and response payloads are staged while a service call is in flight.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    dir: PathBuf,
    prefix: String,
}

impl ScratchSpace {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize `payload` as JSON into a fresh scratch file tagged with `label`.
    pub fn write_json<T: Serialize>(&self, label: &str, payload: &T) -> Result<ScratchPayload> {
        fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}_{}_", self.prefix, label))
            .suffix(".json")
            .tempfile_in(&self.dir)?;
        serde_json::to_writer(&mut file, payload)?;
        file.flush()?;
        log::debug!("Scratch payload written: {}", file.path().display());
        Ok(ScratchPayload { file })
    }
}
