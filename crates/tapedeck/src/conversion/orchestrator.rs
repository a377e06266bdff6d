use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::artifact::{Artifact, ArtifactId, ArtifactRepository, ArtifactStatus};
use crate::converter::Converter;
use crate::storage::ArtifactStore;

use super::ConversionError;

/// Format every artifact is converted to unless configured otherwise.
pub const DEFAULT_TARGET_FORMAT: &str = "wav";

/// Store location of the converted blob for an artifact.
pub fn converted_path(id: ArtifactId, target_format: &str) -> String {
    format!("audio/converted/{}.{}", id, target_format)
}

/// Drives a single artifact through download, convert, upload and
/// bookkeeping.
///
/// ```text
/// pending --(claim)--> converting --(success)--> completed
///                        \--(any failure)--> failed
/// ```
pub struct ConversionOrchestrator {
    repository: Arc<dyn ArtifactRepository>,
    store: Arc<dyn ArtifactStore>,
    converter: Arc<dyn Converter>,
    target_format: String,
}

impl ConversionOrchestrator {
    pub fn new(
        repository: Arc<dyn ArtifactRepository>,
        store: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        Self {
            repository,
            store,
            converter,
            target_format: DEFAULT_TARGET_FORMAT.to_string(),
        }
    }

    pub fn with_target_format(mut self, target_format: impl Into<String>) -> Self {
        self.target_format = target_format.into();
        self
    }

    pub fn target_format(&self) -> &str {
        &self.target_format
    }

    /// Converts the artifact with the given id.
    ///
    /// Storage and converter failures mark the artifact `failed` with the
    /// returned error's message. Repository failures are returned as
    /// [`ConversionError::Persistence`] without touching the record again.
    pub fn convert(&self, artifact_id: ArtifactId) -> Result<(), ConversionError> {
        let _span = info_span!("convert", artifact_id, target = %self.target_format).entered();

        let mut artifact = {
            let _step = info_span!("load").entered();
            self.repository
                .get_by_id(artifact_id)
                .map_err(|e| ConversionError::Persistence {
                    id: artifact_id,
                    source: e,
                })?
                .ok_or(ConversionError::ArtifactNotFound(artifact_id))?
        };

        let original_path = artifact.storage_path.clone();
        let source_format = artifact.current_format.clone();

        {
            let _step = info_span!("mark_converting").entered();
            artifact.status = ArtifactStatus::Converting;
            self.persist(&mut artifact)?;
        }

        let input = {
            let _step = info_span!("download", path = %original_path).entered();
            match self.store.download(&original_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Err(self.record_failure(
                        &mut artifact,
                        ConversionError::Download {
                            path: original_path,
                            source: e,
                        },
                    ))
                }
            }
        };

        let output = {
            let _step = info_span!("transcode", from = %source_format).entered();
            match self
                .converter
                .convert(&input, &source_format, &self.target_format)
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Err(self.record_failure(
                        &mut artifact,
                        ConversionError::Convert {
                            from: source_format,
                            to: self.target_format.clone(),
                            source: e,
                        },
                    ))
                }
            }
        };

        let new_path = converted_path(artifact.id, &self.target_format);
        {
            let _step = info_span!("upload", path = %new_path).entered();
            if let Err(e) = self.store.upload(&new_path, &output) {
                return Err(self.record_failure(
                    &mut artifact,
                    ConversionError::Upload {
                        path: new_path,
                        source: e,
                    },
                ));
            }
        }

        {
            let _step = info_span!("mark_completed").entered();
            artifact.status = ArtifactStatus::Completed;
            artifact.storage_path = new_path.clone();
            artifact.current_format = self.target_format.clone();
            self.persist(&mut artifact)?;
        }

        if original_path != new_path {
            let _step = info_span!("cleanup", path = %original_path).entered();
            if let Err(e) = self.store.delete(&original_path) {
                warn!(
                    "Artifact {} converted but original blob '{}' was not removed: {}",
                    artifact.id, original_path, e
                );
            }
        } else {
            debug!("Artifact {} already stored at its converted path", artifact.id);
        }

        info!(
            "Artifact {} converted {} -> {} ({} bytes)",
            artifact.id,
            source_format,
            self.target_format,
            output.len()
        );
        Ok(())
    }

    fn persist(&self, artifact: &mut Artifact) -> Result<(), ConversionError> {
        self.repository
            .update(artifact)
            .map_err(|e| ConversionError::Persistence {
                id: artifact.id,
                source: e,
            })
    }

    /// Marks the artifact failed with `err`'s message. Returns `err`, or the
    /// persistence error if the failure itself could not be stored.
    fn record_failure(&self, artifact: &mut Artifact, err: ConversionError) -> ConversionError {
        artifact.status = ArtifactStatus::Failed;
        artifact.error = Some(err.to_string());
        match self.persist(artifact) {
            Ok(()) => err,
            Err(persist_err) => {
                warn!(
                    "Could not record failure on artifact {}: {}",
                    artifact.id, persist_err
                );
                persist_err
            }
        }
    }
}
