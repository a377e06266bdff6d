//! Producer side: accepts audio files and queues them for conversion.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::{Artifact, ArtifactId, ArtifactRepository, NewArtifact};
use crate::converter::{is_valid_format_tag, Converter};
use crate::error::UploadError;
use crate::queue::TaskQueue;
use crate::storage::ArtifactStore;

/// Store location for a freshly uploaded original.
pub fn original_path(format: &str) -> String {
    format!("audio/original/{}.{}", Uuid::new_v4(), format)
}

/// Returns the lowercase extension of `filename`, without the dot.
pub fn detect_format(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

pub struct UploadService {
    repository: Arc<dyn ArtifactRepository>,
    store: Arc<dyn ArtifactStore>,
    converter: Arc<dyn Converter>,
    queue: TaskQueue,
}

impl UploadService {
    /// `converter` is only used by [`download_as`](Self::download_as) for
    /// on-the-fly transcoding; scheduled conversions go through the queue.
    pub fn new(
        repository: Arc<dyn ArtifactRepository>,
        store: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
        queue: TaskQueue,
    ) -> Self {
        Self {
            repository,
            store,
            converter,
            queue,
        }
    }

    /// Stores `content`, registers a `pending` artifact and enqueues its
    /// conversion.
    ///
    /// The blob is removed again if the artifact cannot be registered. An
    /// enqueue failure is returned as is and leaves the artifact `pending`.
    pub fn upload(&self, filename: &str, content: &[u8]) -> Result<Artifact, UploadError> {
        let format =
            detect_format(filename).ok_or_else(|| UploadError::MissingFormat(filename.to_string()))?;

        let mime = mime_guess::from_ext(&format).first();
        match mime {
            Some(ref m) if m.type_() == mime_guess::mime::AUDIO => {}
            other => {
                return Err(UploadError::NotAudio {
                    filename: filename.to_string(),
                    mime: other
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                })
            }
        }

        let path = original_path(&format);
        self.store.upload(&path, content)?;

        let artifact = match self.repository.create(&NewArtifact {
            original_name: filename.to_string(),
            current_format: format,
            storage_path: path.clone(),
        }) {
            Ok(artifact) => artifact,
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&path) {
                    warn!("Failed to remove orphaned blob '{}': {}", path, cleanup);
                }
                return Err(e.into());
            }
        };

        let task_id = self.queue.enqueue(&artifact.id.to_string())?;
        info!(
            "Uploaded '{}' as artifact {} (task {})",
            filename, artifact.id, task_id
        );
        Ok(artifact)
    }

    /// Returns the artifact record and its current blob.
    pub fn download(&self, artifact_id: ArtifactId) -> Result<(Artifact, Vec<u8>), UploadError> {
        let artifact = self
            .repository
            .get_by_id(artifact_id)?
            .ok_or(UploadError::ArtifactNotFound(artifact_id))?;
        let content = self.store.download(&artifact.storage_path)?;
        Ok((artifact, content))
    }

    /// Returns the artifact record and its blob in `format`.
    ///
    /// The stored blob is returned as is when `format` matches the
    /// artifact's current format. Otherwise it is transcoded in memory;
    /// the stored artifact is left untouched.
    pub fn download_as(
        &self,
        artifact_id: ArtifactId,
        format: &str,
    ) -> Result<(Artifact, Vec<u8>), UploadError> {
        let format = format.to_ascii_lowercase();
        if !is_valid_format_tag(&format) {
            return Err(UploadError::InvalidFormat(format));
        }

        let (artifact, content) = self.download(artifact_id)?;
        if artifact.current_format == format {
            return Ok((artifact, content));
        }

        debug!(
            "Transcoding artifact {} from {} to {} for download",
            artifact.id, artifact.current_format, format
        );
        let converted = self
            .converter
            .convert(&content, &artifact.current_format, &format)
            .map_err(|source| UploadError::Transcode {
                from: artifact.current_format.clone(),
                to: format.clone(),
                source,
            })?;
        Ok((artifact, converted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStatus;
    use crate::db::Database;
    use crate::error::{ConvertError, RepositoryError};
    use crate::queue::{TaskStatus, DEFAULT_QUEUE_NAME};
    use crate::storage::MemoryArtifactStore;

    struct RejectingRepository;

    impl ArtifactRepository for RejectingRepository {
        fn create(&self, _: &NewArtifact) -> Result<Artifact, RepositoryError> {
            Err(RepositoryError::NotFound(0))
        }

        fn get_by_id(&self, _: ArtifactId) -> Result<Option<Artifact>, RepositoryError> {
            Ok(None)
        }

        fn update(&self, artifact: &mut Artifact) -> Result<(), RepositoryError> {
            Err(RepositoryError::NotFound(artifact.id))
        }
    }

    /// Prefixes the output with the target format, refusing `ogg`.
    struct LabelConverter;

    impl Converter for LabelConverter {
        fn convert(&self, input: &[u8], _: &str, target: &str) -> Result<Vec<u8>, ConvertError> {
            if target == "ogg" {
                return Err(ConvertError::UnsupportedFormat(target.to_string()));
            }
            let mut out = format!("{}:", target).into_bytes();
            out.extend_from_slice(input);
            Ok(out)
        }
    }

    fn service(db: &Database, store: Arc<MemoryArtifactStore>) -> UploadService {
        UploadService::new(
            Arc::new(db.clone()),
            store,
            Arc::new(LabelConverter),
            TaskQueue::new(db.clone(), DEFAULT_QUEUE_NAME),
        )
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("take.MP3").as_deref(), Some("mp3"));
        assert_eq!(detect_format("dir/a.b.flac").as_deref(), Some("flac"));
        assert_eq!(detect_format("README"), None);
        assert_eq!(detect_format("trailing."), None);
    }

    #[test]
    fn test_upload_registers_and_enqueues() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let service = service(&db, store.clone());

        let artifact = service.upload("Voice Memo.FLAC", b"fLaC").unwrap();
        assert_eq!(artifact.status, ArtifactStatus::Pending);
        assert_eq!(artifact.current_format, "flac");
        assert_eq!(artifact.original_name, "Voice Memo.FLAC");
        assert!(artifact.storage_path.starts_with("audio/original/"));
        assert!(artifact.storage_path.ends_with(".flac"));
        assert!(store.contains(&artifact.storage_path));

        let queue = TaskQueue::new(db.clone(), DEFAULT_QUEUE_NAME);
        let task = queue.dequeue().unwrap().unwrap();
        assert_eq!(task.payload, artifact.id.to_string());
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[test]
    fn test_upload_rejects_non_audio() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let service = service(&db, store.clone());

        assert!(matches!(
            service.upload("notes.txt", b"hello"),
            Err(UploadError::NotAudio { .. })
        ));
        assert!(matches!(
            service.upload("noext", b"hello"),
            Err(UploadError::MissingFormat(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_registration_removes_blob() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let service = UploadService::new(
            Arc::new(RejectingRepository),
            store.clone(),
            Arc::new(LabelConverter),
            TaskQueue::new(db, DEFAULT_QUEUE_NAME),
        );

        assert!(matches!(
            service.upload("song.mp3", b"ID3"),
            Err(UploadError::Repository(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_download_returns_current_blob() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let service = service(&db, store);

        let uploaded = service.upload("song.wav", b"RIFF").unwrap();
        let (artifact, content) = service.download(uploaded.id).unwrap();
        assert_eq!(artifact.id, uploaded.id);
        assert_eq!(content, b"RIFF");

        assert!(matches!(
            service.download(999),
            Err(UploadError::ArtifactNotFound(999))
        ));
    }

    #[test]
    fn test_download_as_transcodes_other_formats() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let service = service(&db, store.clone());
        let uploaded = service.upload("take.mp3", b"ID3").unwrap();

        let (_, same) = service.download_as(uploaded.id, "MP3").unwrap();
        assert_eq!(same, b"ID3");

        let (artifact, converted) = service.download_as(uploaded.id, "wav").unwrap();
        assert_eq!(converted, b"wav:ID3");
        assert_eq!(artifact.current_format, "mp3");
        assert_eq!(store.download(&artifact.storage_path).unwrap(), b"ID3");
    }

    #[test]
    fn test_download_as_reports_bad_requests() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(MemoryArtifactStore::new());
        let service = service(&db, store);
        let uploaded = service.upload("take.mp3", b"ID3").unwrap();

        assert!(matches!(
            service.download_as(uploaded.id, "../wav"),
            Err(UploadError::InvalidFormat(_))
        ));
        assert!(matches!(
            service.download_as(uploaded.id, "ogg"),
            Err(UploadError::Transcode { ref from, ref to, .. }) if from == "mp3" && to == "ogg"
        ));
        assert!(matches!(
            service.download_as(999, "wav"),
            Err(UploadError::ArtifactNotFound(999))
        ));
    }
}
