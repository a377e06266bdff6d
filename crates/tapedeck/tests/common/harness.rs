//! Test harness for isolated queue and worker tests.
//!
//! Each `TestHarness` owns a temp directory with its own SQLite file, so
//! opening a second connection to it behaves like another process.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use tapedeck::queue::DEFAULT_QUEUE_NAME;
use tapedeck::{
    Artifact, ArtifactRepository, ArtifactStore, ConversionOrchestrator, ConversionWorker,
    Converter, Database, NewArtifact, TaskId, TaskQueue, TaskStatus, WorkerSettings,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub database: Database,
    pub queue: TaskQueue,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("tapedeck.db");
        let database = Database::open(&db_path).expect("Failed to open database");
        let queue = TaskQueue::new(database.clone(), DEFAULT_QUEUE_NAME);
        Self {
            temp_dir,
            db_path,
            database,
            queue,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// A fresh connection to the same file, standing in for another process.
    pub fn connect(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open second connection")
    }

    pub fn orchestrator_on(
        database: &Database,
        store: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
    ) -> Arc<ConversionOrchestrator> {
        Arc::new(ConversionOrchestrator::new(
            Arc::new(database.clone()),
            store,
            converter,
        ))
    }

    /// Worker over its own connection and queue handle.
    pub fn worker_on(
        database: &Database,
        name: &str,
        store: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
        poll_interval: Duration,
    ) -> ConversionWorker {
        ConversionWorker::new(
            TaskQueue::new(database.clone(), DEFAULT_QUEUE_NAME),
            Self::orchestrator_on(database, store, converter),
            WorkerSettings {
                name: name.to_string(),
                poll_interval,
                claim_timeout: None,
            },
        )
    }

    /// Worker over its own connection that reclaims claims idle for longer
    /// than `claim_timeout` before every poll.
    pub fn reclaiming_worker_on(
        database: &Database,
        name: &str,
        store: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
        claim_timeout: Duration,
    ) -> ConversionWorker {
        ConversionWorker::new(
            TaskQueue::new(database.clone(), DEFAULT_QUEUE_NAME),
            Self::orchestrator_on(database, store, converter),
            WorkerSettings {
                name: name.to_string(),
                poll_interval: Duration::from_millis(10),
                claim_timeout: Some(claim_timeout),
            },
        )
    }

    /// Worker sharing this harness's queue handle, so enqueues wake it.
    pub fn worker(
        &self,
        store: Arc<dyn ArtifactStore>,
        converter: Arc<dyn Converter>,
    ) -> ConversionWorker {
        ConversionWorker::new(
            self.queue.clone(),
            Self::orchestrator_on(&self.database, store, converter),
            WorkerSettings {
                name: "harness-worker".to_string(),
                poll_interval: Duration::from_millis(25),
                claim_timeout: None,
            },
        )
    }

    /// Stores `content` and registers a pending artifact pointing at it.
    pub fn seed_artifact(&self, store: &dyn ArtifactStore, name: &str, content: &[u8]) -> Artifact {
        let format = name.rsplit('.').next().unwrap_or("mp3").to_string();
        let path = format!("audio/original/{}", name);
        store.upload(&path, content).expect("Failed to seed blob");
        self.database
            .create(&NewArtifact {
                original_name: name.to_string(),
                current_format: format,
                storage_path: path,
            })
            .expect("Failed to seed artifact")
    }

    /// Seeds an artifact and enqueues its conversion.
    pub fn submit(&self, store: &dyn ArtifactStore, name: &str, content: &[u8]) -> (Artifact, TaskId) {
        let artifact = self.seed_artifact(store, name, content);
        let task_id = self
            .queue
            .enqueue(&artifact.id.to_string())
            .expect("Failed to enqueue");
        (artifact, task_id)
    }

    pub fn artifact(&self, artifact: &Artifact) -> Artifact {
        self.database
            .get_by_id(artifact.id)
            .expect("Failed to load artifact")
            .expect("Artifact disappeared")
    }

    /// Polls until the task reaches a terminal status or `timeout` passes.
    pub fn wait_for_terminal(&self, task_id: TaskId, timeout: Duration) -> TaskStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self
                .queue
                .get(task_id)
                .expect("Failed to load task")
                .expect("Task disappeared")
                .status;
            if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "task {} still {} after {:?}",
                task_id,
                status,
                timeout
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
