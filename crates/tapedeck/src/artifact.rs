//! Artifact records and the repository contract the pipeline depends on.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RepositoryError;

/// Identifier assigned by the repository when an artifact is created.
pub type ArtifactId = i64;

/// Lifecycle of an artifact.
///
/// ```text
/// pending --(claim)--> converting --(success)--> completed
///                        \--(any failure)--> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Converting,
    Completed,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Converting => "converting",
            ArtifactStatus::Completed => "completed",
            ArtifactStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ArtifactStatus::Pending),
            "converting" => Ok(ArtifactStatus::Converting),
            "completed" => Ok(ArtifactStatus::Completed),
            "failed" => Ok(ArtifactStatus::Failed),
            other => Err(format!("unknown artifact status '{}'", other)),
        }
    }
}

/// A unit of convertible audio content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub id: ArtifactId,
    /// Filename the content was uploaded under.
    pub original_name: String,
    /// Short lowercase format tag such as `mp3` or `wav`.
    pub current_format: String,
    /// Location of the current blob in the artifact store.
    pub storage_path: String,
    pub status: ArtifactStatus,
    /// Last failure message. Never cleared.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the producer when registering a new artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub original_name: String,
    pub current_format: String,
    pub storage_path: String,
}

/// Durable CRUD for artifact records.
///
/// `update` writes every mutable column, bumps `updated_at` on the passed
/// record, and reports a missing row as [`RepositoryError::NotFound`].
pub trait ArtifactRepository: Send + Sync {
    fn create(&self, artifact: &NewArtifact) -> Result<Artifact, RepositoryError>;

    fn get_by_id(&self, id: ArtifactId) -> Result<Option<Artifact>, RepositoryError>;

    fn update(&self, artifact: &mut Artifact) -> Result<(), RepositoryError>;
}
