//! Blob storage for artifact content.
//!
//! Paths are opaque, `/`-separated relative keys such as
//! `audio/original/<uuid>.mp3`. Backends decide how keys map to storage.

pub mod local;
pub mod memory;

use crate::error::StorageError;

pub use local::LocalArtifactStore;
pub use memory::MemoryArtifactStore;

/// Durable blob read/write by opaque path.
pub trait ArtifactStore: Send + Sync {
    /// Writes `content` at `path`, replacing any existing blob.
    fn upload(&self, path: &str, content: &[u8]) -> Result<(), StorageError>;

    /// Reads the blob at `path`.
    fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes the blob at `path`. Missing blobs are reported as
    /// [`StorageError::NotFound`].
    fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Rejects keys that are empty, absolute, or step outside the store root.
pub(crate) fn validate_key(path: &str) -> Result<(), StorageError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_relative_paths() {
        assert!(validate_key("audio/original/a.mp3").is_ok());
        assert!(validate_key("single.wav").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_escapes() {
        for bad in ["", "/etc/passwd", "../secret", "audio/../../x", "a//b", "a\\b", "./a"] {
            assert!(
                matches!(validate_key(bad), Err(StorageError::InvalidPath(_))),
                "expected '{}' to be rejected",
                bad
            );
        }
    }
}
