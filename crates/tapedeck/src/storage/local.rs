use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

use super::{validate_key, ArtifactStore};

/// Stores blobs as files under a root directory.
///
/// Writes go to a temporary file in the destination directory first and
/// are renamed into place, so readers never observe a partial blob.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Creates the store, creating `root` if it does not exist yet.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        ensure_directory(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_key(path)?;
        Ok(self.root.join(path))
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

impl ArtifactStore for LocalArtifactStore {
    fn upload(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        let dir = target.parent().unwrap_or(&self.root);
        ensure_directory(dir)?;

        let write_err = |e: std::io::Error| StorageError::WriteFile {
            path: target.clone(),
            source: e,
        };

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        staged.write_all(content).map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;
        staged.persist(&target).map_err(|e| write_err(e.error))?;

        log::debug!("Stored {} bytes at {}", content.len(), target.display());
        Ok(())
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let source = self.resolve(path)?;
        std::fs::read(&source).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::ReadFile {
                path: source,
                source: e,
            },
        })
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        std::fs::remove_file(&target).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::DeleteFile {
                path: target,
                source: e,
            },
        })
    }
}
