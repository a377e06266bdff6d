//! Artifact repository: CRUD operations for the `artifacts` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::artifact::{Artifact, ArtifactId, ArtifactRepository, ArtifactStatus, NewArtifact};
use crate::error::RepositoryError;

const SELECT_COLUMNS: &str = "SELECT id, original_name, current_format, storage_path, status,
     error, created_at, updated_at FROM artifacts";

fn artifact_from_row(row: &Row<'_>) -> Result<Artifact, rusqlite::Error> {
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Artifact {
        id: row.get(0)?,
        original_name: row.get(1)?,
        current_format: row.get(2)?,
        storage_path: row.get(3)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?,
        error: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
        updated_at: parse_timestamp(7, &updated_at)?,
    })
}

/// Inserts a new artifact in `pending` status and returns the stored row.
pub fn insert(db: &Database, artifact: &NewArtifact) -> Result<Artifact, DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO artifacts (original_name, current_format, storage_path, status,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                artifact.original_name,
                artifact.current_format,
                artifact.storage_path,
                ArtifactStatus::Pending.as_str(),
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let row = conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            artifact_from_row,
        )?;
        Ok(row)
    })
}

/// Finds an artifact by its ID.
pub fn find_by_id(db: &Database, id: ArtifactId) -> Result<Option<Artifact>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                artifact_from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Overwrites the mutable columns of an artifact.
///
/// Returns the number of rows affected; zero means the id is unknown.
pub fn update(db: &Database, artifact: &Artifact) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE artifacts SET original_name = ?2, current_format = ?3, storage_path = ?4,
             status = ?5, error = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                artifact.id,
                artifact.original_name,
                artifact.current_format,
                artifact.storage_path,
                artifact.status.as_str(),
                artifact.error,
                format_timestamp(artifact.updated_at),
            ],
        )?;
        Ok(changed)
    })
}

/// Counts artifacts with the given status.
pub fn count_by_status(db: &Database, status: ArtifactStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

impl ArtifactRepository for Database {
    fn create(&self, artifact: &NewArtifact) -> Result<Artifact, RepositoryError> {
        Ok(insert(self, artifact)?)
    }

    fn get_by_id(&self, id: ArtifactId) -> Result<Option<Artifact>, RepositoryError> {
        Ok(find_by_id(self, id)?)
    }

    fn update(&self, artifact: &mut Artifact) -> Result<(), RepositoryError> {
        artifact.updated_at = Utc::now();
        match update(self, artifact)? {
            0 => Err(RepositoryError::NotFound(artifact.id)),
            _ => Ok(()),
        }
    }
}
