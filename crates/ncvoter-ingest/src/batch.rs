//! Buffered, transactional writes of new voters, change records and
//! bad-line ranges
//!
//! Everything queued since the last flush becomes durable in one
//! transaction, new voters first so their change records can reference
//! them. Nothing is visible until that commit.

use crate::bad_lines::BadLineTracker;
use crate::db::{bad_lines, changes, voters};
use crate::db::changes::NewChange;
use crate::models::OpCode;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ncvoter_common::RowData;
use sqlx::types::Json;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug)]
struct PendingChange {
    ncid: String,
    /// `None` while the owning voter is itself still queued
    voter_id: Option<i64>,
    op_code: OpCode,
    md5_hash: String,
    snapshot_dt: DateTime<Utc>,
    file_lineno: i64,
    data: RowData,
}

/// What one flush wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub voters: usize,
    pub changes: usize,
    pub bad_line_ranges: usize,
}

pub struct BatchWriter {
    file_id: i64,
    batch_size: usize,
    new_voters: Vec<(String, RowData)>,
    changes: Vec<PendingChange>,
    state_updates: Vec<(i64, RowData)>,
    pending_ncids: HashSet<String>,
    bad_lines: BadLineTracker,
}

impl BatchWriter {
    pub fn new(file_id: i64, filename: impl Into<String>, batch_size: usize) -> Self {
        Self {
            file_id,
            batch_size,
            new_voters: Vec::new(),
            changes: Vec::new(),
            state_updates: Vec::new(),
            pending_ncids: HashSet::new(),
            bad_lines: BadLineTracker::new(filename),
        }
    }

    pub fn bad_lines(&mut self) -> &mut BadLineTracker {
        &mut self.bad_lines
    }

    /// Whether this identifier has unflushed work
    pub fn is_pending(&self, ncid: &str) -> bool {
        self.pending_ncids.contains(ncid)
    }

    pub fn len(&self) -> usize {
        self.changes.len() + self.bad_lines.completed_len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.bad_lines.completed_len() == 0 && !self.bad_lines.has_pending()
    }

    pub fn needs_flush(&self) -> bool {
        self.len() >= self.batch_size
    }

    /// Queue a first sighting: a new voter plus its ADD record
    pub fn queue_add(
        &mut self,
        ncid: &str,
        md5_hash: String,
        snapshot_dt: DateTime<Utc>,
        file_lineno: i64,
        data: RowData,
    ) {
        self.new_voters.push((ncid.to_string(), data.clone()));
        self.changes.push(PendingChange {
            ncid: ncid.to_string(),
            voter_id: None,
            op_code: OpCode::Add,
            md5_hash,
            snapshot_dt,
            file_lineno,
            data,
        });
        self.pending_ncids.insert(ncid.to_string());
    }

    /// Queue a MODIFY record for a stored voter along with its new state
    #[allow(clippy::too_many_arguments)]
    pub fn queue_modify(
        &mut self,
        voter_id: i64,
        ncid: &str,
        md5_hash: String,
        snapshot_dt: DateTime<Utc>,
        file_lineno: i64,
        delta: RowData,
        new_state: RowData,
    ) {
        self.changes.push(PendingChange {
            ncid: ncid.to_string(),
            voter_id: Some(voter_id),
            op_code: OpCode::Modify,
            md5_hash,
            snapshot_dt,
            file_lineno,
            data: delta,
        });
        self.state_updates.push((voter_id, new_state));
        self.pending_ncids.insert(ncid.to_string());
    }

    /// Persist all queued work in one transaction and clear the buffers.
    /// A still-open bad-line range is written too and stays open.
    pub async fn flush(&mut self, pool: &SqlitePool) -> Result<FlushStats> {
        if self.is_empty() {
            return Ok(FlushStats::default());
        }

        let mut tx = pool.begin().await.context("Failed to begin flush transaction")?;

        let mut ids: HashMap<&str, i64> = HashMap::with_capacity(self.new_voters.len());
        for (ncid, data) in &self.new_voters {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO voters (ncid, data, deleted) VALUES (?1, ?2, 0) RETURNING id",
            )
            .bind(ncid)
            .bind(Json(data))
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert voter {}", ncid))?;
            ids.insert(ncid.as_str(), id);
        }

        let mut records = Vec::with_capacity(self.changes.len());
        for change in &self.changes {
            let voter_id = match change.voter_id {
                Some(id) => id,
                None => *ids
                    .get(change.ncid.as_str())
                    .with_context(|| format!("No queued voter for change of {}", change.ncid))?,
            };
            records.push(NewChange {
                voter_id,
                op_code: change.op_code,
                md5_hash: change.md5_hash.clone(),
                snapshot_dt: change.snapshot_dt,
                file_id: self.file_id,
                file_lineno: change.file_lineno,
                data: change.data.clone(),
            });
        }
        changes::insert_many(&mut *tx, &records).await?;

        for (voter_id, state) in &self.state_updates {
            voters::set_data(&mut *tx, *voter_id, Some(state)).await?;
        }

        let (completed, pending) = self.bad_lines.take_for_flush();
        let mut ranges = completed.len();
        for range in &completed {
            bad_lines::upsert(&mut *tx, range).await?;
        }
        let pending_id = match pending.as_deref() {
            Some(range) => {
                ranges += 1;
                Some(bad_lines::upsert(&mut *tx, range).await?)
            }
            None => None,
        };

        tx.commit().await.context("Failed to commit flush transaction")?;

        if let (Some(range), Some(id)) = (pending, pending_id) {
            range.id = Some(id);
        }

        let stats = FlushStats {
            voters: self.new_voters.len(),
            changes: records.len(),
            bad_line_ranges: ranges,
        };
        debug!(
            file_id = self.file_id,
            voters = stats.voters,
            changes = stats.changes,
            bad_line_ranges = stats.bad_line_ranges,
            "Flushed batch"
        );

        self.new_voters.clear();
        self.changes.clear();
        self.state_updates.clear();
        self.pending_ncids.clear();

        Ok(stats)
    }

    /// Drop all unflushed work
    pub fn discard(&mut self) {
        self.new_voters.clear();
        self.changes.clear();
        self.state_updates.clear();
        self.pending_ncids.clear();
        self.bad_lines.clear();
    }
}
