//! Task repository for the `tasks` table behind the durable queue.
//!
//! Every function is scoped by `task_type` or by task id; the queue type
//! in [`crate::queue`] adds notification and error mapping on top.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::queue::task::{Task, TaskId, TaskStatus};

/// Upper bound on compare-and-swap retries inside one claim transaction.
const CLAIM_ATTEMPTS: usize = 4;

const SELECT_COLUMNS: &str =
    "SELECT id, task_type, payload, status, error, attempt, created_at, updated_at FROM tasks";

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let status: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Task {
        id: row.get(0)?,
        task_type: row.get(1)?,
        payload: row.get(2)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        error: row.get(4)?,
        attempt: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
        updated_at: parse_timestamp(7, &updated_at)?,
    })
}

/// Inserts a `pending` task and returns its id.
pub fn insert(
    db: &Database,
    task_type: &str,
    payload: &str,
    now: DateTime<Utc>,
) -> Result<TaskId, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tasks (task_type, payload, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![task_type, payload, TaskStatus::Pending.as_str(), now],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Claims the oldest pending task of `task_type`.
///
/// The select and the `pending -> processing` update share one immediate
/// transaction, and the update is guarded on the row still being pending,
/// so a row is handed to exactly one caller across connections. Each claim
/// bumps `attempt`, which later scopes heartbeats and resolution to it.
pub fn claim_oldest_pending(
    db: &Database,
    task_type: &str,
    now: DateTime<Utc>,
) -> Result<Option<Task>, DatabaseError> {
    let now = format_timestamp(now);
    db.with_transaction(|tx| {
        for _ in 0..CLAIM_ATTEMPTS {
            let candidate: Option<TaskId> = tx
                .query_row(
                    "SELECT id FROM tasks
                     WHERE task_type = ?1 AND status = ?2
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1",
                    params![task_type, TaskStatus::Pending.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(task_id) = candidate else {
                return Ok(None);
            };

            let changes = tx.execute(
                "UPDATE tasks SET status = ?2, attempt = attempt + 1, updated_at = ?3
                 WHERE id = ?1 AND status = ?4",
                params![
                    task_id,
                    TaskStatus::Processing.as_str(),
                    now,
                    TaskStatus::Pending.as_str(),
                ],
            )?;

            if changes == 0 {
                continue;
            }

            let task = tx.query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![task_id],
                task_from_row,
            )?;
            return Ok(Some(task));
        }

        Ok(None)
    })
}

/// Moves a task to `completed` unless it already failed.
///
/// With `attempt` set, only the claim that still owns the row (status
/// `processing`, same attempt number) may resolve it. Returns the number
/// of rows changed; zero means the id is unknown, the task is `failed`,
/// or the claim was lost.
pub fn mark_completed(
    db: &Database,
    id: TaskId,
    attempt: Option<u32>,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let changed = match attempt {
            Some(attempt) => conn.execute(
                "UPDATE tasks SET status = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = ?4 AND attempt = ?5",
                params![
                    id,
                    TaskStatus::Completed.as_str(),
                    now,
                    TaskStatus::Processing.as_str(),
                    attempt,
                ],
            )?,
            None => conn.execute(
                "UPDATE tasks SET status = ?2, updated_at = ?3
                 WHERE id = ?1 AND status != ?4",
                params![
                    id,
                    TaskStatus::Completed.as_str(),
                    now,
                    TaskStatus::Failed.as_str(),
                ],
            )?,
        };
        Ok(changed)
    })
}

/// Moves a task to `failed` with `message` unless it already completed.
///
/// `attempt` scopes the update to one claim, as in [`mark_completed`].
pub fn mark_failed(
    db: &Database,
    id: TaskId,
    attempt: Option<u32>,
    message: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let changed = match attempt {
            Some(attempt) => conn.execute(
                "UPDATE tasks SET status = ?2, error = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = ?5 AND attempt = ?6",
                params![
                    id,
                    TaskStatus::Failed.as_str(),
                    message,
                    now,
                    TaskStatus::Processing.as_str(),
                    attempt,
                ],
            )?,
            None => conn.execute(
                "UPDATE tasks SET status = ?2, error = ?3, updated_at = ?4
                 WHERE id = ?1 AND status != ?5",
                params![
                    id,
                    TaskStatus::Failed.as_str(),
                    message,
                    now,
                    TaskStatus::Completed.as_str(),
                ],
            )?,
        };
        Ok(changed)
    })
}

/// Refreshes `updated_at` of a live claim so `reclaim_stale` leaves it
/// alone. Returns zero when the claim is no longer the current one.
pub fn touch_claim(
    db: &Database,
    id: TaskId,
    attempt: u32,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tasks SET updated_at = ?3
             WHERE id = ?1 AND attempt = ?2 AND status = ?4",
            params![
                id,
                attempt,
                format_timestamp(now),
                TaskStatus::Processing.as_str(),
            ],
        )?;
        Ok(changed)
    })
}

/// Finds a task by its ID.
pub fn find_by_id(db: &Database, id: TaskId) -> Result<Option<Task>, DatabaseError> {
    db.with_conn(|conn| {
        let task = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    })
}

/// Counts tasks of `task_type` in the given status.
pub fn count_by_status(
    db: &Database,
    task_type: &str,
    status: TaskStatus,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE task_type = ?1 AND status = ?2",
            params![task_type, status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Returns `processing` tasks whose claim was last touched before `cutoff`
/// to `pending`. Returns how many rows were reset.
pub fn reclaim_stale(
    db: &Database,
    task_type: &str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    db.with_transaction(|tx| {
        let changed = tx.execute(
            "UPDATE tasks SET status = ?3, updated_at = ?4
             WHERE task_type = ?1 AND status = ?5 AND updated_at < ?2",
            params![
                task_type,
                format_timestamp(cutoff),
                TaskStatus::Pending.as_str(),
                format_timestamp(now),
                TaskStatus::Processing.as_str(),
            ],
        )?;
        Ok(changed)
    })
}
