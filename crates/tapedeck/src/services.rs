//! Wires the collaborators described by a [`Config`] together.

use std::sync::Arc;

use log::info;

use crate::artifact::ArtifactRepository;
use crate::config::{Config, StorageBackend};
use crate::conversion::ConversionOrchestrator;
use crate::converter::{Converter, FfmpegConverter};
use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::queue::TaskQueue;
use crate::storage::{ArtifactStore, LocalArtifactStore, MemoryArtifactStore};
use crate::upload::UploadService;
use crate::worker::{ConversionWorker, WorkerSettings};

/// Everything a tapedeck process needs, built once from configuration.
pub struct Services {
    pub config: Config,
    pub database: Database,
    pub queue: TaskQueue,
    pub repository: Arc<dyn ArtifactRepository>,
    pub store: Arc<dyn ArtifactStore>,
    pub orchestrator: Arc<ConversionOrchestrator>,
    pub uploads: Arc<UploadService>,
}

impl Services {
    /// Opens the database and storage named by `config` and uses ffmpeg
    /// for conversion.
    pub fn from_config(config: &Config) -> Result<Self> {
        let converter = Arc::new(FfmpegConverter::new(&config.conversion.ffmpeg_path));
        Self::with_converter(config, converter)
    }

    pub fn with_converter(config: &Config, converter: Arc<dyn Converter>) -> Result<Self> {
        let database = Database::open(&config.database_path())?;
        let store = build_store(config)?;
        Ok(Self::assemble(config, database, store, converter))
    }

    /// Builds the object graph over already opened resources.
    pub fn assemble(
        config: &Config,
        database: Database,
        store: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        let repository: Arc<dyn ArtifactRepository> = Arc::new(database.clone());
        let queue = TaskQueue::new(database.clone(), config.queue.name.clone());
        let orchestrator = Arc::new(
            ConversionOrchestrator::new(
                Arc::clone(&repository),
                Arc::clone(&store),
                Arc::clone(&converter),
            )
            .with_target_format(config.conversion.target_format.clone()),
        );
        let uploads = Arc::new(UploadService::new(
            Arc::clone(&repository),
            Arc::clone(&store),
            converter,
            queue.clone(),
        ));

        Self {
            config: config.clone(),
            database,
            queue,
            repository,
            store,
            orchestrator,
            uploads,
        }
    }

    /// Creates (but does not start) the worker with the given index.
    pub fn worker(&self, index: usize) -> ConversionWorker {
        let settings = WorkerSettings {
            name: format!("worker-{}", index + 1),
            poll_interval: std::time::Duration::from_millis(self.config.worker.poll_interval_ms),
            claim_timeout: self
                .config
                .worker
                .claim_timeout_secs
                .map(std::time::Duration::from_secs),
        };
        ConversionWorker::new(self.queue.clone(), Arc::clone(&self.orchestrator), settings)
    }

    /// One worker per configured `worker.count`.
    pub fn workers(&self) -> Vec<ConversionWorker> {
        (0..self.config.worker.count).map(|i| self.worker(i)).collect()
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn ArtifactStore>> {
    match config.storage.backend {
        StorageBackend::Local => {
            let directory = config.storage.directory().ok_or_else(|| {
                StorageError::InvalidPath("storage.directory is not set".to_string())
            })?;
            info!("Using local artifact store at {}", directory.display());
            Ok(Arc::new(LocalArtifactStore::new(directory)?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory artifact store");
            Ok(Arc::new(MemoryArtifactStore::new()))
        }
    }
}
