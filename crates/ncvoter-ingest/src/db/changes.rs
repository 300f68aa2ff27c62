//! Queries over the append-only `change_records` log

use crate::models::{ChangeRecord, OpCode};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ncvoter_common::RowData;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor};

/// Rows per multi-row INSERT; eight binds each stays well under SQLite's
/// variable limit
const INSERT_CHUNK: usize = 100;

/// A change record ready to be written, owner already resolved
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub voter_id: i64,
    pub op_code: OpCode,
    pub md5_hash: String,
    pub snapshot_dt: DateTime<Utc>,
    pub file_id: i64,
    pub file_lineno: i64,
    pub data: RowData,
}

/// Change log of one voter in replay order
pub async fn for_voter(exec: impl SqliteExecutor<'_>, voter_id: i64) -> Result<Vec<ChangeRecord>> {
    sqlx::query_as::<_, ChangeRecord>(
        r#"
        SELECT id, voter_id, op_code, md5_hash, snapshot_dt, file_id, file_lineno, data
        FROM change_records
        WHERE voter_id = ?1
        ORDER BY snapshot_dt, id
        "#,
    )
    .bind(voter_id)
    .fetch_all(exec)
    .await
    .with_context(|| format!("Failed to load change log of voter {}", voter_id))
}

/// Whether any record of this voter already carries `md5_hash`
pub async fn hash_exists(exec: impl SqliteExecutor<'_>, voter_id: i64, md5_hash: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM change_records WHERE voter_id = ?1 AND md5_hash = ?2)",
    )
    .bind(voter_id)
    .bind(md5_hash)
    .fetch_one(exec)
    .await
    .context("Failed to check change hash")?;
    Ok(exists)
}

/// Highest line number recorded for a file, 0 when none
pub async fn max_lineno(exec: impl SqliteExecutor<'_>, file_id: i64) -> Result<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(file_lineno) FROM change_records WHERE file_id = ?1")
            .bind(file_id)
            .fetch_one(exec)
            .await
            .context("Failed to read change checkpoint")?;
    Ok(max.unwrap_or(0))
}

pub async fn count_for_file(exec: impl SqliteExecutor<'_>, file_id: i64) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM change_records WHERE file_id = ?1")
        .bind(file_id)
        .fetch_one(exec)
        .await
        .context("Failed to count change records")
}

/// Distinct voters touched by a file
pub async fn voter_ids_for_file(exec: impl SqliteExecutor<'_>, file_id: i64) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT DISTINCT voter_id FROM change_records WHERE file_id = ?1 ORDER BY voter_id")
        .bind(file_id)
        .fetch_all(exec)
        .await
        .context("Failed to list voters changed by file")
}

/// Latest file id that produced any change, by declared date
pub async fn latest_file_id(exec: impl SqliteExecutor<'_>) -> Result<Option<i64>> {
    sqlx::query_scalar(
        r#"
        SELECT sf.id FROM source_files sf
        WHERE EXISTS (SELECT 1 FROM change_records cr WHERE cr.file_id = sf.id)
        ORDER BY sf.created DESC, sf.id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(exec)
    .await
    .context("Failed to find latest changed file")
}

pub async fn delete_for_file(exec: impl SqliteExecutor<'_>, file_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM change_records WHERE file_id = ?1")
        .bind(file_id)
        .execute(exec)
        .await
        .context("Failed to delete change records")?;
    Ok(result.rows_affected())
}

/// Bulk insert on one connection (normally a flush transaction)
pub async fn insert_many(conn: &mut SqliteConnection, changes: &[NewChange]) -> Result<()> {
    for chunk in changes.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO change_records (voter_id, op_code, md5_hash, snapshot_dt, file_id, file_lineno, data) ",
        );
        builder.push_values(chunk, |mut b, change| {
            b.push_bind(change.voter_id)
                .push_bind(change.op_code.as_str())
                .push_bind(change.md5_hash.as_str())
                .push_bind(change.snapshot_dt)
                .push_bind(change.file_id)
                .push_bind(change.file_lineno)
                .push_bind(Json(&change.data));
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .context("Failed to insert change records")?;
    }
    Ok(())
}
