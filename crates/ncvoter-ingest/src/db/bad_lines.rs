//! Queries over `bad_lines`

use crate::models::BadLineRange;
use anyhow::{Context, Result};
use sqlx::SqliteExecutor;

const COLUMNS: &str =
    "id, filename, first_line_no, last_line_no, example_line, message, is_warning";

/// Write a range: insert when new, otherwise extend its last line in place.
/// Returns the row id.
pub async fn upsert(exec: impl SqliteExecutor<'_>, range: &BadLineRange) -> Result<i64> {
    match range.id {
        Some(id) => {
            sqlx::query("UPDATE bad_lines SET last_line_no = ?1 WHERE id = ?2")
                .bind(range.last_line_no)
                .bind(id)
                .execute(exec)
                .await
                .context("Failed to extend bad line range")?;
            Ok(id)
        }
        None => sqlx::query_scalar(
            r#"
            INSERT INTO bad_lines (filename, first_line_no, last_line_no, example_line, message, is_warning)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(&range.filename)
        .bind(range.first_line_no)
        .bind(range.last_line_no)
        .bind(&range.example_line)
        .bind(&range.message)
        .bind(range.is_warning)
        .fetch_one(exec)
        .await
        .context("Failed to record bad line range"),
    }
}

/// Ranges for one file, or all files, in line order
pub async fn list(exec: impl SqliteExecutor<'_>, filename: Option<&str>) -> Result<Vec<BadLineRange>> {
    let ranges = match filename {
        Some(filename) => {
            let sql = format!(
                "SELECT {COLUMNS} FROM bad_lines WHERE filename = ?1 ORDER BY first_line_no, id"
            );
            sqlx::query_as::<_, BadLineRange>(&sql)
                .bind(filename)
                .fetch_all(exec)
                .await
        }
        None => {
            let sql = format!("SELECT {COLUMNS} FROM bad_lines ORDER BY filename, first_line_no, id");
            sqlx::query_as::<_, BadLineRange>(&sql).fetch_all(exec).await
        }
    };
    ranges.context("Failed to list bad lines")
}

/// Highest line covered by any range of the file, 0 when none
pub async fn max_last_line(exec: impl SqliteExecutor<'_>, filename: &str) -> Result<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(last_line_no) FROM bad_lines WHERE filename = ?1")
            .bind(filename)
            .fetch_one(exec)
            .await
            .context("Failed to read bad line checkpoint")?;
    Ok(max.unwrap_or(0))
}

/// The range of a file that ends exactly at `line_no`, if any
pub async fn ending_at(
    exec: impl SqliteExecutor<'_>,
    filename: &str,
    line_no: i64,
) -> Result<Option<BadLineRange>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM bad_lines WHERE filename = ?1 AND last_line_no = ?2 ORDER BY id DESC LIMIT 1"
    );
    sqlx::query_as::<_, BadLineRange>(&sql)
        .bind(filename)
        .bind(line_no)
        .fetch_optional(exec)
        .await
        .context("Failed to read bad line range at checkpoint")
}

pub async fn delete_for_filename(exec: impl SqliteExecutor<'_>, filename: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM bad_lines WHERE filename = ?1")
        .bind(filename)
        .execute(exec)
        .await
        .context("Failed to delete bad lines")?;
    Ok(result.rows_affected())
}
