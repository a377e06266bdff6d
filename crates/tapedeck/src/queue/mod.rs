//! Durable FIFO task queue with exclusive-claim semantics.
//!
//! Tasks live in the `tasks` table of the shared [`Database`]. Any number
//! of `TaskQueue` handles (in one process or many) may poll the same file;
//! [`TaskQueue::dequeue`] hands each pending row to exactly one caller.
//!
//! Enqueues made through a handle also wake one in-process waiter, which
//! is what lets workers react faster than their poll interval. Tasks
//! enqueued by other processes are still picked up on the next poll.

pub mod task;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;

use crate::db::{task_repo, Database};
use crate::error::QueueError;

pub use task::{Task, TaskId, TaskStatus};

/// Queue name used for audio conversion tasks.
pub const DEFAULT_QUEUE_NAME: &str = "audio_conversion";

/// Longest single wait inside [`TaskQueue::dequeue_timeout`], so tasks
/// enqueued by other processes are noticed without a notification.
const LONG_POLL_SLICE: Duration = Duration::from_millis(250);

/// Handle to one logical queue. Cheap to clone; clones share the
/// connection and the wake-up notifier.
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
    name: String,
    notify: Arc<Notify>,
}

impl TaskQueue {
    pub fn new(db: Database, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a `pending` task and wakes one in-process waiter.
    pub fn enqueue(&self, payload: &str) -> Result<TaskId, QueueError> {
        let id = task_repo::insert(&self.db, &self.name, payload, Utc::now())?;
        log::debug!("Enqueued task {} on '{}'", id, self.name);
        self.notify.notify_one();
        Ok(id)
    }

    /// Claims the oldest pending task, or returns `None` when there is none.
    pub fn dequeue(&self) -> Result<Option<Task>, QueueError> {
        let task = task_repo::claim_oldest_pending(&self.db, &self.name, Utc::now())?;
        if let Some(ref task) = task {
            log::debug!("Claimed task {} on '{}'", task.id, self.name);
        }
        Ok(task)
    }

    /// Long-poll variant of [`dequeue`](Self::dequeue).
    ///
    /// Waits for an enqueue notification (or a short poll slice) between
    /// attempts and gives up with `None` once `timeout` has elapsed.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.dequeue()? {
                return Ok(Some(task));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wait_until = deadline.min(now + LONG_POLL_SLICE);
            let _ = tokio::time::timeout_at(wait_until, self.notify.notified()).await;
        }
    }

    /// Marks a task `completed`.
    ///
    /// Repeating the call is harmless. A task that already failed stays
    /// failed. This ignores who holds the claim; workers resolve through
    /// [`complete_claim`](Self::complete_claim) instead.
    pub fn complete(&self, task_id: TaskId) -> Result<(), QueueError> {
        if task_repo::mark_completed(&self.db, task_id, None, Utc::now())? == 0 {
            self.resolve_unchanged(task_id, TaskStatus::Completed)?;
        }
        Ok(())
    }

    /// Marks a task `failed` and records `message`.
    ///
    /// A task that already completed stays completed.
    pub fn fail(&self, task_id: TaskId, message: &str) -> Result<(), QueueError> {
        if task_repo::mark_failed(&self.db, task_id, None, message, Utc::now())? == 0 {
            self.resolve_unchanged(task_id, TaskStatus::Failed)?;
        }
        Ok(())
    }

    /// Marks a claimed task `completed`, provided `task` is still the
    /// current claim. A claim that was reclaimed and handed to someone
    /// else gets [`QueueError::ClaimLost`] and changes nothing.
    pub fn complete_claim(&self, task: &Task) -> Result<(), QueueError> {
        let changed =
            task_repo::mark_completed(&self.db, task.id, Some(task.attempt), Utc::now())?;
        if changed == 0 {
            return Err(self.lost_claim(task)?);
        }
        Ok(())
    }

    /// Marks a claimed task `failed`, provided `task` is still the current
    /// claim.
    pub fn fail_claim(&self, task: &Task, message: &str) -> Result<(), QueueError> {
        let changed =
            task_repo::mark_failed(&self.db, task.id, Some(task.attempt), message, Utc::now())?;
        if changed == 0 {
            return Err(self.lost_claim(task)?);
        }
        Ok(())
    }

    /// Refreshes a live claim so [`reclaim_stale`](Self::reclaim_stale)
    /// does not hand it out again while it is still being worked on.
    pub fn heartbeat(&self, task: &Task) -> Result<(), QueueError> {
        if task_repo::touch_claim(&self.db, task.id, task.attempt, Utc::now())? == 0 {
            return Err(self.lost_claim(task)?);
        }
        Ok(())
    }

    pub fn get(&self, task_id: TaskId) -> Result<Option<Task>, QueueError> {
        Ok(task_repo::find_by_id(&self.db, task_id)?)
    }

    pub fn count_by_status(&self, status: TaskStatus) -> Result<u64, QueueError> {
        Ok(task_repo::count_by_status(&self.db, &self.name, status)?)
    }

    /// Returns claims untouched for longer than `older_than` to `pending`.
    ///
    /// Only useful when claimants can die mid-task; nothing calls this
    /// unless a claim timeout is configured.
    pub fn reclaim_stale(&self, older_than: Duration) -> Result<usize, QueueError> {
        let now = Utc::now();
        let older_than = chrono::Duration::from_std(older_than)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let cutoff = now - older_than;
        let reset = task_repo::reclaim_stale(&self.db, &self.name, cutoff, now)?;
        if reset > 0 {
            log::warn!("Reclaimed {} stale task(s) on '{}'", reset, self.name);
            for _ in 0..reset {
                self.notify.notify_one();
            }
        }
        Ok(reset)
    }

    /// Shared notifier signalled by every in-process enqueue.
    pub(crate) fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    fn lost_claim(&self, task: &Task) -> Result<QueueError, QueueError> {
        match task_repo::find_by_id(&self.db, task.id)? {
            None => Ok(QueueError::TaskNotFound(task.id)),
            Some(_) => Ok(QueueError::ClaimLost {
                task_id: task.id,
                attempt: task.attempt,
            }),
        }
    }

    /// Explains why a resolution changed no row: unknown id is an error,
    /// an already-terminal task is not.
    fn resolve_unchanged(&self, task_id: TaskId, wanted: TaskStatus) -> Result<(), QueueError> {
        match task_repo::find_by_id(&self.db, task_id)? {
            None => Err(QueueError::TaskNotFound(task_id)),
            Some(task) => {
                log::debug!(
                    "Task {} already {}, leaving it instead of marking {}",
                    task_id,
                    task.status,
                    wanted
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Barrier;

    fn test_queue() -> TaskQueue {
        TaskQueue::new(Database::open_in_memory().unwrap(), DEFAULT_QUEUE_NAME)
    }

    #[test]
    fn test_fifo_order() {
        let queue = test_queue();
        let payloads: Vec<String> = (1..=20).map(|i| i.to_string()).collect();
        for payload in &payloads {
            queue.enqueue(payload).unwrap();
        }

        let mut seen = Vec::new();
        while let Some(task) = queue.dequeue().unwrap() {
            seen.push(task.payload);
        }
        assert_eq!(seen, payloads);
    }

    #[test]
    fn test_dequeue_empty_returns_none() {
        let queue = test_queue();
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn test_claimed_task_is_processing() {
        let queue = test_queue();
        let id = queue.enqueue("7").unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(queue.get(id).unwrap().unwrap().status, TaskStatus::Processing);
    }

    #[test]
    fn test_completed_task_is_never_dequeued_again() {
        let queue = test_queue();
        queue.enqueue("1").unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        queue.complete(task.id).unwrap();
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn test_complete_twice_is_harmless() {
        let queue = test_queue();
        queue.enqueue("1").unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        queue.complete(task.id).unwrap();
        queue.complete(task.id).unwrap();
        assert_eq!(queue.get(task.id).unwrap().unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_fail_records_message() {
        let queue = test_queue();
        queue.enqueue("1").unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        queue.fail(task.id, "decoder exploded").unwrap();

        let stored = queue.get(task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("decoder exploded"));
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn test_resolving_unknown_task_is_an_error() {
        let queue = test_queue();
        assert!(matches!(queue.complete(77), Err(QueueError::TaskNotFound(77))));
        assert!(matches!(queue.fail(78, "x"), Err(QueueError::TaskNotFound(78))));
    }

    #[test]
    fn test_queues_are_isolated_by_name() {
        let db = Database::open_in_memory().unwrap();
        let audio = TaskQueue::new(db.clone(), "audio_conversion");
        let other = TaskQueue::new(db, "thumbnails");
        other.enqueue("1").unwrap();
        assert!(audio.dequeue().unwrap().is_none());
        assert_eq!(other.count_by_status(TaskStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_dequeue_never_duplicates() {
        let queue = test_queue();
        for i in 0..50 {
            queue.enqueue(&i.to_string()).unwrap();
        }

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let queue = queue.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let mut claimed = Vec::new();
                    while let Some(task) = queue.dequeue().unwrap() {
                        claimed.push(task.id);
                    }
                    claimed
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    #[tokio::test]
    async fn test_dequeue_timeout_returns_none_when_idle() {
        let queue = test_queue();
        let started = std::time::Instant::now();
        let task = queue
            .dequeue_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(task.is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dequeue_timeout_wakes_on_enqueue() {
        let queue = test_queue();
        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.enqueue("late arrival").unwrap();
        });

        let task = queue
            .dequeue_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("task should arrive before the timeout");
        assert_eq!(task.payload, "late arrival");
        handle.await.unwrap();
    }

    #[test]
    fn test_reclaim_stale_with_zero_timeout_requeues_claims() {
        let queue = test_queue();
        queue.enqueue("1").unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(queue.reclaim_stale(Duration::ZERO).unwrap(), 1);
        let again = queue.dequeue().unwrap().unwrap();
        assert_eq!(again.id, task.id);
    }

    #[test]
    fn test_reclaimed_task_only_resolves_through_current_claim() {
        let queue = test_queue();
        let id = queue.enqueue("1").unwrap();
        let stale = queue.dequeue().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        queue.reclaim_stale(Duration::from_millis(1)).unwrap();
        let current = queue.dequeue().unwrap().unwrap();
        assert_eq!(current.id, id);

        assert!(matches!(
            queue.complete_claim(&stale),
            Err(QueueError::ClaimLost { task_id, attempt: 1 }) if task_id == id
        ));
        assert_eq!(queue.get(id).unwrap().unwrap().status, TaskStatus::Processing);

        queue.fail_claim(&current, "b failed").unwrap();
        let task = queue.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("b failed"));
    }

    #[test]
    fn test_heartbeat_fails_once_claim_is_resolved() {
        let queue = test_queue();
        queue.enqueue("1").unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        queue.heartbeat(&task).unwrap();
        queue.complete_claim(&task).unwrap();

        assert!(matches!(
            queue.heartbeat(&task),
            Err(QueueError::ClaimLost { .. })
        ));
    }
}
