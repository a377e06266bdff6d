pub mod artifact;
pub mod config;
pub mod conversion;
pub mod converter;
pub mod db;
pub mod error;
pub mod queue;
pub mod services;
pub mod storage;
pub mod telemetry;
pub mod upload;
pub mod worker;

pub use artifact::{Artifact, ArtifactId, ArtifactRepository, ArtifactStatus, NewArtifact};
pub use config::{load_config, Config};
pub use conversion::{ConversionError, ConversionOrchestrator};
pub use converter::{Converter, FfmpegConverter};
pub use db::Database;
pub use error::{
    ConfigError, ConvertError, QueueError, RepositoryError, Result, StorageError, TapedeckError,
    UploadError, WorkerError,
};
pub use queue::{Task, TaskId, TaskQueue, TaskStatus};
pub use services::Services;
pub use storage::{ArtifactStore, LocalArtifactStore, MemoryArtifactStore};
pub use upload::UploadService;
pub use worker::{ConversionWorker, JobPool, TickOutcome, WorkerSettings};
