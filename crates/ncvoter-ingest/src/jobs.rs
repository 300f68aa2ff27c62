//! Job tracking for snapshot files: locking, reset, completion, resume
//! checkpoints and per-file statistics

use crate::db::voters::{self, SweepResult};
use crate::db::{bad_lines, changes, files};
use crate::models::{FileStatus, SourceFile};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{info, warn};

/// Statistics collected while processing one file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct IngestStats {
    /// Data lines read, header excluded
    pub total_lines: i64,
    /// New voters recorded with an ADD
    pub added: i64,
    /// MODIFY records written
    pub modified: i64,
    /// Rows whose hash was already in the voter's change log
    pub unchanged: i64,
    /// Rows that differed only in ignored fields
    pub ignored: i64,
    /// Lines skipped as bad
    pub rejected: i64,
    /// Lines repaired and processed with a warning
    pub repaired: i64,
    /// Lines skipped because they were below the resume checkpoint
    pub resumed: i64,
    /// Voters marked deleted by the presence sweep
    pub deleted: i64,
    /// Voters undeleted by the presence sweep
    pub undeleted: i64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn inc_added(&mut self) {
        self.added += 1;
    }

    pub fn inc_modified(&mut self) {
        self.modified += 1;
    }

    pub fn inc_unchanged(&mut self) {
        self.unchanged += 1;
    }

    pub fn inc_ignored(&mut self) {
        self.ignored += 1;
    }

    pub fn inc_rejected(&mut self) {
        self.rejected += 1;
    }

    pub fn inc_repaired(&mut self) {
        self.repaired += 1;
    }

    pub fn inc_resumed(&mut self) {
        self.resumed += 1;
    }

    pub fn record_sweep(&mut self, sweep: SweepResult) {
        self.deleted += sweep.deleted as i64;
        self.undeleted += sweep.undeleted as i64;
    }

    pub fn lines_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.total_lines as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    /// Merge another file's stats into a run total
    pub fn merge(self, other: Self) -> Self {
        Self {
            total_lines: self.total_lines + other.total_lines,
            added: self.added + other.added,
            modified: self.modified + other.modified,
            unchanged: self.unchanged + other.unchanged,
            ignored: self.ignored + other.ignored,
            rejected: self.rejected + other.rejected,
            repaired: self.repaired + other.repaired,
            resumed: self.resumed + other.resumed,
            deleted: self.deleted + other.deleted,
            undeleted: self.undeleted + other.undeleted,
            duration_secs: self.duration_secs + other.duration_secs,
            started_at: self.started_at.or(other.started_at),
            completed_at: other.completed_at.or(self.completed_at),
        }
    }
}

/// Result of trying to claim a file
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    /// The file is now PROCESSING and owned by this run
    Locked,
    /// Another file is PROCESSING
    Busy(SourceFile),
    /// The file was no longer in a claimable state
    Stale(FileStatus),
}

/// Status transitions of `source_files`, with mutual exclusion across the
/// whole job set
#[derive(Clone)]
pub struct JobTracker {
    pool: SqlitePool,
}

impl JobTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Claim a file for processing.
    ///
    /// Refuses while any other file is PROCESSING. A file that is itself
    /// PROCESSING is only claimable with `resume`.
    pub async fn lock(&self, file: &SourceFile, resume: bool) -> Result<LockOutcome> {
        let outcome = match self.try_lock(file, resume).await {
            Ok(outcome) => outcome,
            Err(e) if is_busy(&e) => {
                // Lost the race for the write lock to another worker
                match files::other_processing(&self.pool, file.id).await? {
                    Some(other) => LockOutcome::Busy(other),
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        if outcome == LockOutcome::Locked {
            info!(file_id = file.id, filename = %file.filename, resume, "Locked source file");
        }
        Ok(outcome)
    }

    async fn try_lock(&self, file: &SourceFile, resume: bool) -> Result<LockOutcome> {
        let mut tx = self.pool.begin().await.context("Failed to begin lock transaction")?;

        // The claim is the first statement, so the transaction takes the
        // write lock before reading anything and never holds a stale snapshot
        let claimed = sqlx::query(
            r#"
            UPDATE source_files SET file_status = ?1
            WHERE id = ?2
              AND (file_status = ?3 OR (?4 AND file_status = ?1))
              AND NOT EXISTS (
                  SELECT 1 FROM source_files WHERE file_status = ?1 AND id != ?2
              )
            "#,
        )
        .bind(FileStatus::Processing.as_str())
        .bind(file.id)
        .bind(FileStatus::Unprocessed.as_str())
        .bind(resume)
        .execute(&mut *tx)
        .await
        .context("Failed to lock source file")?
        .rows_affected()
            == 1;

        let outcome = if claimed {
            LockOutcome::Locked
        } else if let Some(other) = files::other_processing(&mut *tx, file.id).await? {
            LockOutcome::Busy(other)
        } else {
            let current = files::find(&mut *tx, file.id)
                .await?
                .with_context(|| format!("Source file {} disappeared", file.id))?;
            LockOutcome::Stale(current.file_status)
        };

        tx.commit().await.context("Failed to commit lock transaction")?;
        Ok(outcome)
    }

    /// Return a file to UNPROCESSED after an abort
    pub async fn reset(&self, file_id: i64) -> Result<()> {
        files::set_status(&self.pool, file_id, FileStatus::Unprocessed).await?;
        warn!(file_id, "Reset source file to unprocessed");
        Ok(())
    }

    /// Mark the file PROCESSED and run the presence sweep in one transaction
    pub async fn complete(&self, file_id: i64, seen: &HashSet<String>) -> Result<SweepResult> {
        let mut tx = self.pool.begin().await.context("Failed to begin finalize transaction")?;

        if !files::transition(&mut *tx, file_id, FileStatus::Processing, FileStatus::Processed).await? {
            anyhow::bail!("Source file {} was not processing when finalized", file_id);
        }
        let sweep = voters::sweep_presence(&mut *tx, seen.iter()).await?;

        tx.commit().await.context("Failed to commit finalize transaction")?;

        info!(
            file_id,
            deleted = sweep.deleted,
            undeleted = sweep.undeleted,
            "Source file processed"
        );
        Ok(sweep)
    }

    /// Highest line already accounted for in this file, by either a change
    /// record or a bad-line range. Lines at or below it are skipped.
    pub async fn checkpoint(&self, file: &SourceFile) -> Result<i64> {
        let changes = changes::max_lineno(&self.pool, file.id).await?;
        let bad = bad_lines::max_last_line(&self.pool, &file.filename).await?;
        Ok(changes.max(bad))
    }
}

/// SQLITE_BUSY and its extended codes, such as BUSY_SNAPSHOT (517)
fn is_busy(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .filter_map(|db_err| db_err.as_database_error())
        .filter_map(|db_err| db_err.code())
        .filter_map(|code| code.parse::<i32>().ok())
        .any(|code| code & 0xff == 5)
}
