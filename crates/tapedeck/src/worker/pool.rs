use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info};

use crate::error::WorkerError;

/// Default number of jobs that may wait for a free thread.
pub const DEFAULT_CAPACITY: usize = 100;

/// A unit of in-memory work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool draining a bounded channel of jobs.
///
/// Jobs live only in memory; anything not started when the process dies
/// is lost. Use the task queue for work that must survive restarts.
pub struct JobPool {
    job_sender: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl JobPool {
    /// Spawns `workers` threads sharing a channel that holds up to
    /// `capacity` waiting jobs.
    ///
    /// # Panics
    /// Panics if `workers` is 0.
    pub fn new(workers: usize, capacity: usize) -> Self {
        assert!(workers > 0, "workers must be > 0");
        let (job_sender, job_receiver) = bounded::<Job>(capacity);

        let workers = (0..workers)
            .map(|worker_id| {
                let job_rx = job_receiver.clone();
                thread::spawn(move || run_worker(worker_id, job_rx))
            })
            .collect::<Vec<_>>();

        info!("Started job pool with {} workers", workers.len());

        Self {
            job_sender,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job, blocking while the channel is full.
    pub fn enqueue_job<F>(&self, job: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.job_sender
            .send(Box::new(job))
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Queues a job without blocking; a saturated pool yields
    /// [`WorkerError::QueueFull`].
    pub fn try_enqueue_job<F>(&self, job: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.job_sender
            .try_send(Box::new(job))
            .map_err(|e| match e {
                TrySendError::Full(_) => WorkerError::QueueFull,
                TrySendError::Disconnected(_) => WorkerError::ChannelClosed,
            })
    }

    /// Closes the channel, lets already queued jobs finish and joins every
    /// thread.
    pub fn shutdown(self) {
        info!("Shutting down job pool...");
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Job worker {} panicked: {:?}", i, e);
            } else {
                debug!("Job worker {} finished", i);
            }
        }

        info!("All job workers have stopped");
    }
}

fn run_worker(worker_id: usize, job_receiver: Receiver<Job>) {
    debug!("Job worker {} started", worker_id);

    for job in job_receiver.iter() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Job worker {} recovered from panicking job: {}", worker_id, message);
        }
    }

    debug!("Job worker {} stopped", worker_id);
}
