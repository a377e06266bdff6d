pub mod conversion_worker;
pub mod pool;

pub use conversion_worker::{
    ConversionWorker, TaskError, TickOutcome, WorkerSettings, DEFAULT_POLL_INTERVAL,
};
pub use pool::{Job, JobPool, DEFAULT_CAPACITY};
