use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StorageError;

use super::{validate_key, ArtifactStore};

/// Keeps blobs in a process-local map. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs
            .lock()
            .map(|blobs| blobs.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn upload(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        validate_key(path)?;
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::LockPoisoned)?;
        blobs.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(path)?;
        let blobs = self.blobs.lock().map_err(|_| StorageError::LockPoisoned)?;
        blobs
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        validate_key(path)?;
        let mut blobs = self.blobs.lock().map_err(|_| StorageError::LockPoisoned)?;
        blobs
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}
