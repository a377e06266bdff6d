//! Background loop that claims audio conversion tasks and runs them.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn};

use crate::artifact::ArtifactId;
use crate::conversion::{ConversionError, ConversionOrchestrator};
use crate::error::{QueueError, WorkerError};
use crate::queue::{Task, TaskId, TaskQueue};

/// Default wait between polls when the queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Claims are refreshed this many times per claim timeout while a task is
/// being processed.
const HEARTBEATS_PER_TIMEOUT: u32 = 3;

/// Why a claimed task could not be processed. Its display string is the
/// message stored on the failed task.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid task payload '{0}': expected an artifact id")]
    InvalidPayload(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// What a single loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was pending.
    Idle,
    Completed(TaskId),
    Failed(TaskId),
    /// The claim was reclaimed and handed to another worker before this
    /// one could resolve it. The result was discarded.
    ClaimLost(TaskId),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Recorded on every tick span and log line.
    pub name: String,
    pub poll_interval: Duration,
    /// When set, `processing` claims idle for longer than this are
    /// returned to `pending` before each claim attempt. A worker keeps its
    /// own claim fresh while it converts.
    pub claim_timeout: Option<Duration>,
}

impl WorkerSettings {
    /// Rejects durations the loop cannot run with.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.poll_interval.is_zero() {
            return Err(WorkerError::InvalidSettings(format!(
                "worker '{}': poll interval must be greater than zero",
                self.name
            )));
        }
        if self.claim_timeout.is_some_and(|t| t.is_zero()) {
            return Err(WorkerError::InvalidSettings(format!(
                "worker '{}': claim timeout must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: "worker-1".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            claim_timeout: None,
        }
    }
}

struct WorkerCore {
    settings: WorkerSettings,
    queue: TaskQueue,
    orchestrator: Arc<ConversionOrchestrator>,
}

impl WorkerCore {
    fn tick(&self) -> Result<TickOutcome, WorkerError> {
        let _span = info_span!("worker_tick", worker = %self.settings.name).entered();

        self.reclaim()?;
        let Some(task) = self.queue.dequeue()? else {
            return Ok(TickOutcome::Idle);
        };
        self.resolve(&task)
    }

    /// Like [`tick`](Self::tick), but waits up to `wait` for a task to be
    /// enqueued before reporting [`TickOutcome::Idle`].
    async fn tick_waiting(&self, wait: Duration) -> Result<TickOutcome, WorkerError> {
        self.reclaim()?;
        let Some(task) = self.queue.dequeue_timeout(wait).await? else {
            return Ok(TickOutcome::Idle);
        };
        let _span = info_span!("worker_tick", worker = %self.settings.name).entered();
        self.resolve(&task)
    }

    fn reclaim(&self) -> Result<(), WorkerError> {
        if let Some(timeout) = self.settings.claim_timeout {
            self.queue.reclaim_stale(timeout)?;
        }
        Ok(())
    }

    fn resolve(&self, task: &Task) -> Result<TickOutcome, WorkerError> {
        let (resolution, outcome) = match self.process_claimed(task) {
            Ok(()) => (self.queue.complete_claim(task), TickOutcome::Completed(task.id)),
            Err(e) => {
                let message = e.to_string();
                match &e {
                    TaskError::Conversion(c) if c.is_recorded() => error!(
                        "Task {} failed, artifact marked failed: {}",
                        task.id, message
                    ),
                    _ => error!("Task {} failed: {}", task.id, message),
                }
                (
                    self.queue.fail_claim(task, &message),
                    TickOutcome::Failed(task.id),
                )
            }
        };

        match resolution {
            Ok(()) => {
                if outcome == TickOutcome::Completed(task.id) {
                    info!("Task {} completed", task.id);
                }
                Ok(outcome)
            }
            Err(QueueError::ClaimLost { attempt, .. }) => {
                warn!(
                    "Task {} was reclaimed during attempt {}; discarding this result",
                    task.id, attempt
                );
                Ok(TickOutcome::ClaimLost(task.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Processes `task`, refreshing its claim in the background when a
    /// claim timeout is configured.
    fn process_claimed(&self, task: &Task) -> Result<(), TaskError> {
        let Some(timeout) = self.settings.claim_timeout else {
            return self.process(task);
        };
        let every = (timeout / HEARTBEATS_PER_TIMEOUT).max(Duration::from_millis(1));
        let queue = &self.queue;
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        std::thread::scope(|scope| {
            scope.spawn(move || loop {
                match done_rx.recv_timeout(every) {
                    Err(RecvTimeoutError::Timeout) => match queue.heartbeat(task) {
                        Ok(()) => {}
                        Err(QueueError::ClaimLost { .. }) => {
                            warn!("Task {} lost its claim while processing", task.id);
                            break;
                        }
                        Err(e) => warn!("Failed to refresh claim on task {}: {}", task.id, e),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

            let result = self.process(task);
            drop(done_tx);
            result
        })
    }

    fn process(&self, task: &Task) -> Result<(), TaskError> {
        let artifact_id: ArtifactId = task
            .payload
            .trim()
            .parse()
            .map_err(|_| TaskError::InvalidPayload(task.payload.clone()))?;
        debug!("Task {} converts artifact {}", task.id, artifact_id);
        self.orchestrator.convert(artifact_id)?;
        Ok(())
    }
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

/// Claims tasks from a [`TaskQueue`] one at a time and hands their
/// artifact to a [`ConversionOrchestrator`].
///
/// The loop wakes on its poll interval or when a task is enqueued through
/// a clone of the same queue handle, whichever comes first. Several
/// workers may share one database; each task is processed by exactly one.
pub struct ConversionWorker {
    core: Arc<WorkerCore>,
    running: Mutex<Option<RunningLoop>>,
}

impl ConversionWorker {
    pub fn new(
        queue: TaskQueue,
        orchestrator: Arc<ConversionOrchestrator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore {
                settings,
                queue,
                orchestrator,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.settings.name
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// Runs one iteration on the calling thread.
    pub fn run_once(&self) -> Result<TickOutcome, WorkerError> {
        self.core.tick()
    }

    /// Runs one iteration, long-polling the queue for up to `wait` when
    /// nothing is pending.
    pub async fn run_next(&self, wait: Duration) -> Result<TickOutcome, WorkerError> {
        self.core.tick_waiting(wait).await
    }

    /// Starts the background loop and returns immediately.
    pub fn start(&self) -> Result<(), WorkerError> {
        self.core.settings.validate()?;
        let mut running = self
            .running
            .lock()
            .map_err(|_| WorkerError::SpawnFailed("worker state lock poisoned".to_string()))?;
        if running.is_some() {
            return Err(WorkerError::AlreadyRunning(self.core.settings.name.clone()));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);

        let thread = std::thread::Builder::new()
            .name(format!("tapedeck-{}", core.settings.name))
            .spawn(move || runtime.block_on(run_loop(core, stop_rx)))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        info!("Worker '{}' started", self.core.settings.name);
        *running = Some(RunningLoop { stop_tx, thread });
        Ok(())
    }

    /// Signals the loop and waits for it to exit. A task that is being
    /// processed is finished first. Does nothing if the worker is not
    /// running.
    pub fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(RunningLoop { stop_tx, thread }) = running else {
            return;
        };

        let _ = stop_tx.send(true);
        if thread.join().is_err() {
            error!("Worker '{}' thread panicked", self.core.settings.name);
        }
        info!("Worker '{}' stopped", self.core.settings.name);
    }
}

impl Drop for ConversionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(core: Arc<WorkerCore>, mut stop_rx: watch::Receiver<bool>) {
    let notify = core.queue.notifier();
    let mut ticker = tokio::time::interval(core.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick completes immediately

    loop {
        if *stop_rx.borrow() {
            break;
        }

        match core.tick() {
            // More work may be waiting; go again without sleeping.
            Ok(TickOutcome::Completed(_))
            | Ok(TickOutcome::Failed(_))
            | Ok(TickOutcome::ClaimLost(_)) => continue,
            Ok(TickOutcome::Idle) => {}
            Err(e) => warn!(
                "Worker '{}' could not reach the queue: {}",
                core.settings.name, e
            ),
        }

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
            _ = notify.notified() => {
                debug!("Worker '{}' woken by enqueue", core.settings.name);
            }
        }
    }
}
