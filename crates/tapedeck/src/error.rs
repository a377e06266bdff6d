use std::path::PathBuf;
use thiserror::Error;

use crate::artifact::ArtifactId;
use crate::queue::TaskId;

#[derive(Error, Debug)]
pub enum TapedeckError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Converter error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] crate::conversion::ConversionError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::telemetry::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage path '{0}'")]
    InvalidPath(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unsupported audio format '{0}'")]
    UnsupportedFormat(String),

    #[error("Failed to launch '{binary}': {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter I/O failed ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Invalid worker settings: {0}")]
    InvalidSettings(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job queue is full")]
    QueueFull,

    #[error("Task queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Claim {attempt} on task {task_id} was superseded")]
    ClaimLost { task_id: TaskId, attempt: u32 },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Artifact {0} not found")]
    NotFound(ArtifactId),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Cannot determine audio format of '{0}'")]
    MissingFormat(String),

    #[error("'{filename}' is not an audio file ({mime})")]
    NotAudio { filename: String, mime: String },

    #[error("Artifact {0} not found")]
    ArtifactNotFound(ArtifactId),

    #[error("Invalid audio format '{0}'")]
    InvalidFormat(String),

    #[error("Failed to transcode {from} to {to}: {source}")]
    Transcode {
        from: String,
        to: String,
        #[source]
        source: ConvertError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, TapedeckError>;
