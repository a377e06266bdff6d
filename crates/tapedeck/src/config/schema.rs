use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::conversion::DEFAULT_TARGET_FORMAT;
use crate::queue::DEFAULT_QUEUE_NAME;
use crate::worker::DEFAULT_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// SQLite file holding artifacts and tasks. `~/` is expanded.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub job_pool: JobPoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
            conversion: ConversionConfig::default(),
            job_pool: JobPoolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Resolved database location: the configured path, or the per-user
    /// default under the home directory.
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => expand_home(path),
            None => crate::db::default_database_path()
                .unwrap_or_else(|| PathBuf::from("tapedeck.db")),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Root directory for the local backend.
    #[serde(default = "default_storage_directory")]
    pub directory: Option<String>,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_storage_directory() -> Option<String> {
    Some("./blobs".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            directory: default_storage_directory(),
        }
    }
}

impl StorageConfig {
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.as_deref().map(expand_home)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
}

fn default_queue_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Claims idle for longer than this are handed out again. Off when
    /// unset.
    #[serde(default)]
    pub claim_timeout_secs: Option<u64>,
}

fn default_worker_count() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            claim_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default = "default_target_format")]
    pub target_format: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

fn default_target_format() -> String {
    DEFAULT_TARGET_FORMAT.to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            target_format: default_target_format(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPoolConfig {
    #[serde(default = "default_job_workers")]
    pub workers: usize,
    #[serde(default = "default_job_capacity")]
    pub capacity: usize,
}

fn default_job_workers() -> usize {
    num_cpus::get()
}

fn default_job_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for JobPoolConfig {
    fn default() -> Self {
        Self {
            workers: default_job_workers(),
            capacity: default_job_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}
