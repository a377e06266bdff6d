use thiserror::Error;

use crate::artifact::ArtifactId;
use crate::error::{ConvertError, RepositoryError, StorageError};

/// Why a conversion did not finish.
///
/// `Download`, `Convert` and `Upload` are recorded on the artifact before
/// they are returned; their display string is exactly what ends up in
/// `artifact.error`.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Artifact {0} not found")]
    ArtifactNotFound(ArtifactId),

    #[error("Failed to persist artifact {id}: {source}")]
    Persistence {
        id: ArtifactId,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to download '{path}': {source}")]
    Download {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to convert {from} to {to}: {source}")]
    Convert {
        from: String,
        to: String,
        #[source]
        source: ConvertError,
    },

    #[error("Failed to upload '{path}': {source}")]
    Upload {
        path: String,
        #[source]
        source: StorageError,
    },
}

impl ConversionError {
    /// True for failures that were written to the artifact record.
    pub fn is_recorded(&self) -> bool {
        matches!(
            self,
            ConversionError::Download { .. }
                | ConversionError::Convert { .. }
                | ConversionError::Upload { .. }
        )
    }
}
