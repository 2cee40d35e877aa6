use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactRole {
    Base,
    White,
    Black,
    Final,
}

impl ArtifactRole {
    /// Filename suffix. The final artifact carries none.
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            ArtifactRole::Base => Some("base"),
            ArtifactRole::White => Some("white"),
            ArtifactRole::Black => Some("black"),
            ArtifactRole::Final => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Base => "base",
            ArtifactRole::White => "white",
            ArtifactRole::Black => "black",
            ArtifactRole::Final => "final",
        }
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image written to the output directory by one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageArtifact {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub role: ArtifactRole,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl ImageArtifact {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}
