//! Queries over `source_files`

use crate::models::{DataFileKind, FileStatus, SourceFile};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, etag, filename, data_file_kind, created, file_status";

/// Insert a new job in UNPROCESSED state, returning its id
pub async fn insert(
    exec: impl SqliteExecutor<'_>,
    etag: &str,
    filename: &str,
    kind: DataFileKind,
    created: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO source_files (etag, filename, data_file_kind, created, file_status)
        VALUES (?1, ?2, ?3, ?4, ?5)
        RETURNING id
        "#,
    )
    .bind(etag)
    .bind(filename)
    .bind(kind.as_str())
    .bind(created)
    .bind(FileStatus::Unprocessed.as_str())
    .fetch_one(exec)
    .await
    .with_context(|| format!("Failed to register source file {}", filename))?;

    Ok(id)
}

pub async fn find(exec: impl SqliteExecutor<'_>, id: i64) -> Result<Option<SourceFile>> {
    let sql = format!("SELECT {COLUMNS} FROM source_files WHERE id = ?1");
    sqlx::query_as::<_, SourceFile>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await
        .context("Failed to load source file")
}

pub async fn find_by_etag(exec: impl SqliteExecutor<'_>, etag: &str) -> Result<Option<SourceFile>> {
    let sql = format!("SELECT {COLUMNS} FROM source_files WHERE etag = ?1 ORDER BY id LIMIT 1");
    sqlx::query_as::<_, SourceFile>(&sql)
        .bind(etag)
        .fetch_optional(exec)
        .await
        .context("Failed to look up source file by etag")
}

pub async fn find_by_filename(
    exec: impl SqliteExecutor<'_>,
    filename: &str,
) -> Result<Option<SourceFile>> {
    let sql = format!("SELECT {COLUMNS} FROM source_files WHERE filename = ?1");
    sqlx::query_as::<_, SourceFile>(&sql)
        .bind(filename)
        .fetch_optional(exec)
        .await
        .context("Failed to look up source file by name")
}

/// All jobs, or only those in `status`, oldest declared date first
pub async fn list(
    exec: impl SqliteExecutor<'_>,
    status: Option<FileStatus>,
) -> Result<Vec<SourceFile>> {
    let files = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {COLUMNS} FROM source_files WHERE file_status = ?1 ORDER BY created, id"
            );
            sqlx::query_as::<_, SourceFile>(&sql)
                .bind(status.as_str())
                .fetch_all(exec)
                .await
        }
        None => {
            let sql = format!("SELECT {COLUMNS} FROM source_files ORDER BY created, id");
            sqlx::query_as::<_, SourceFile>(&sql).fetch_all(exec).await
        }
    };
    files.context("Failed to list source files")
}

/// Whether a job other than `except` is PROCESSING
pub async fn other_processing(exec: impl SqliteExecutor<'_>, except: i64) -> Result<Option<SourceFile>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM source_files WHERE file_status = ?1 AND id != ?2 ORDER BY id LIMIT 1"
    );
    sqlx::query_as::<_, SourceFile>(&sql)
        .bind(FileStatus::Processing.as_str())
        .bind(except)
        .fetch_optional(exec)
        .await
        .context("Failed to check for files in progress")
}

/// Move a job from `from` to `to`; returns false when it was not in `from`
pub async fn transition(
    exec: impl SqliteExecutor<'_>,
    id: i64,
    from: FileStatus,
    to: FileStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE source_files SET file_status = ?1 WHERE id = ?2 AND file_status = ?3")
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(exec)
        .await
        .with_context(|| format!("Failed to move source file {} to {}", id, to))?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_status(exec: impl SqliteExecutor<'_>, id: i64, status: FileStatus) -> Result<()> {
    sqlx::query("UPDATE source_files SET file_status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id)
        .execute(exec)
        .await
        .with_context(|| format!("Failed to set source file {} to {}", id, status))?;
    Ok(())
}

/// Cancel every job; returns how many changed
pub async fn cancel_all(exec: impl SqliteExecutor<'_>) -> Result<u64> {
    let result = sqlx::query("UPDATE source_files SET file_status = ?1 WHERE file_status != ?1")
        .bind(FileStatus::Cancelled.as_str())
        .execute(exec)
        .await
        .context("Failed to cancel source files")?;
    Ok(result.rows_affected())
}
