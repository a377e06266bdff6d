//! Converter and store doubles.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tapedeck::error::{ConvertError, StorageError};
use tapedeck::{ArtifactStore, Converter, MemoryArtifactStore};

/// Prefixes the input with the target tag so tests can tell converted
/// bytes apart. Counts invocations and can be slowed down.
#[derive(Default)]
pub struct TagConverter {
    calls: AtomicUsize,
    delay: Duration,
}

impl TagConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Converter for TagConverter {
    fn convert(&self, input: &[u8], _: &str, target: &str) -> Result<Vec<u8>, ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let mut out = format!("{}:", target).into_bytes();
        out.extend_from_slice(input);
        Ok(out)
    }
}

/// Always fails as if the encoder rejected the input.
pub struct FailingConverter;

impl Converter for FailingConverter {
    fn convert(&self, _: &[u8], _: &str, _: &str) -> Result<Vec<u8>, ConvertError> {
        Err(ConvertError::Failed {
            status: "exit status: 1".to_string(),
            stderr: "Invalid data found when processing input".to_string(),
        })
    }
}

/// Memory store whose selected operations fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryArtifactStore,
    pub fail_download: bool,
    pub fail_upload: bool,
    pub fail_delete: bool,
}

impl FlakyStore {
    pub fn failing_download() -> Self {
        Self {
            fail_download: true,
            ..Self::default()
        }
    }

    pub fn failing_upload() -> Self {
        Self {
            fail_upload: true,
            ..Self::default()
        }
    }

    pub fn failing_delete() -> Self {
        Self {
            fail_delete: true,
            ..Self::default()
        }
    }

    fn outage(path: &str) -> StorageError {
        StorageError::ReadFile {
            path: path.into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "backend unavailable"),
        }
    }
}

impl ArtifactStore for FlakyStore {
    fn upload(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        if self.fail_upload && path.starts_with("audio/converted/") {
            return Err(Self::outage(path));
        }
        self.inner.upload(path, content)
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        if self.fail_download {
            return Err(Self::outage(path));
        }
        self.inner.download(path)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        if self.fail_delete {
            return Err(Self::outage(path));
        }
        self.inner.delete(path)
    }
}
