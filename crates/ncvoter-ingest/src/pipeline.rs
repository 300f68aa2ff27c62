//! Snapshot ingestion orchestrator
//!
//! Processes registered snapshot files one at a time, oldest declared date
//! first. For each file:
//!
//! 1. **Locking**: claim the job; refuse while another file is in progress
//! 2. **Streaming**: decode, reconcile, hash and diff every line past the
//!    resume checkpoint, buffering results in a [`BatchWriter`]
//! 3. **Flushing**: write whatever is still buffered
//! 4. **Finalizing**: mark the job processed and sweep for voters that
//!    disappeared from (or came back to) the registry
//!
//! Any error resets the job to unprocessed and is returned. Cancellation
//! drops unflushed work, resets the job and returns normally.

use crate::batch::BatchWriter;
use crate::config::IngestConfig;
use crate::db::{bad_lines, changes, files, voters};
use crate::decoder::open_snapshot;
use crate::diff::{diff_rows, merge_into, replay};
use crate::error::{RowError, RowFailure};
use crate::hasher::content_hash;
use crate::jobs::{IngestStats, JobTracker, LockOutcome};
use crate::models::{DataFileKind, FileStatus, SourceFile};
use crate::progress::create_line_progress;
use crate::reconciler::{parse_header, Reconciled, RowReconciler};
use crate::schema::parse_row;
use anyhow::{Context, Result};
use ncvoter_common::RawRow;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Where a file is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Locking,
    Streaming,
    Flushing,
    Finalizing,
    Done,
    Reset,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Locking => "locking",
            Phase::Streaming => "streaming",
            Phase::Flushing => "flushing",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
            Phase::Reset => "reset",
        }
    }

    /// Phase entered when something goes wrong in this one
    pub fn on_failure(self) -> Phase {
        match self {
            Phase::Done => Phase::Done,
            _ => Phase::Reset,
        }
    }
}

/// What happened to one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Added,
    Modified,
    /// Hash already present in the voter's log
    Unchanged,
    /// Differences were confined to ignored fields
    Ignored,
}

/// Result of one file
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed(IngestStats),
    Cancelled(IngestStats),
    /// Another file holds the lock
    Busy(SourceFile),
    /// The job changed state before it could be claimed
    Skipped(FileStatus),
}

/// Result of a whole run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        files: usize,
        stats: IngestStats,
    },
    /// Stopped because `processing` is in progress elsewhere
    Busy {
        processing: SourceFile,
        files: usize,
        stats: IngestStats,
    },
    Cancelled {
        files: usize,
        stats: IngestStats,
    },
}

impl RunOutcome {
    pub fn stats(&self) -> &IngestStats {
        match self {
            RunOutcome::Completed { stats, .. }
            | RunOutcome::Busy { stats, .. }
            | RunOutcome::Cancelled { stats, .. } => stats,
        }
    }

    pub fn files(&self) -> usize {
        match self {
            RunOutcome::Completed { files, .. }
            | RunOutcome::Busy { files, .. }
            | RunOutcome::Cancelled { files, .. } => *files,
        }
    }
}

enum StreamEnd {
    Finished(IngestStats),
    Cancelled(IngestStats),
}

pub struct IngestPipeline {
    pool: SqlitePool,
    config: IngestConfig,
    tracker: JobTracker,
    cancel: CancellationToken,
    quiet: bool,
}

impl IngestPipeline {
    pub fn new(pool: SqlitePool, config: IngestConfig) -> Self {
        Self {
            tracker: JobTracker::new(pool.clone()),
            pool,
            config,
            cancel: CancellationToken::new(),
            quiet: false,
        }
    }

    /// Stop at the next line once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Hide progress bars
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process every claimable file, oldest first.
    ///
    /// With `resume`, files left PROCESSING by an earlier run are picked up
    /// first and continued from their checkpoint. Without it, a file in
    /// progress stops the run with [`RunOutcome::Busy`].
    pub async fn process_files(&self, resume: bool) -> Result<RunOutcome> {
        let mut total = IngestStats::default();
        let mut processed = 0;
        let mut attempted: HashSet<i64> = HashSet::new();

        if !resume {
            if let Some(busy) = files::list(&self.pool, Some(FileStatus::Processing))
                .await?
                .into_iter()
                .next()
            {
                warn!(
                    file_id = busy.id,
                    filename = %busy.filename,
                    "A file is already being processed; use --resume to continue it"
                );
                return Ok(RunOutcome::Busy {
                    processing: busy,
                    files: 0,
                    stats: total,
                });
            }
        }

        while let Some(file) = self.next_file(resume, &attempted).await? {
            attempted.insert(file.id);

            match self.process_file(&file, resume).await? {
                FileOutcome::Processed(stats) => {
                    processed += 1;
                    total = total.merge(stats);
                }
                FileOutcome::Cancelled(stats) => {
                    return Ok(RunOutcome::Cancelled {
                        files: processed,
                        stats: total.merge(stats),
                    });
                }
                FileOutcome::Busy(other) => {
                    return Ok(RunOutcome::Busy {
                        processing: other,
                        files: processed,
                        stats: total,
                    });
                }
                FileOutcome::Skipped(status) => {
                    debug!(file_id = file.id, %status, "Skipping file that changed state");
                }
            }
        }

        Ok(RunOutcome::Completed {
            files: processed,
            stats: total,
        })
    }

    async fn next_file(&self, resume: bool, attempted: &HashSet<i64>) -> Result<Option<SourceFile>> {
        let mut candidates = Vec::new();
        if resume {
            candidates.extend(files::list(&self.pool, Some(FileStatus::Processing)).await?);
        }
        candidates.extend(files::list(&self.pool, Some(FileStatus::Unprocessed)).await?);

        Ok(candidates
            .into_iter()
            .filter(|f| f.data_file_kind == DataFileKind::NCVoter)
            .find(|f| !attempted.contains(&f.id)))
    }

    /// Lock, ingest and finalize one file
    pub async fn process_file(&self, file: &SourceFile, resume: bool) -> Result<FileOutcome> {
        let span = info_span!("snapshot", file_id = file.id, filename = %file.short_filename());

        async {
            let mut phase = Phase::Locking;
            debug!(phase = phase.as_str(), "Claiming file");

            match self.tracker.lock(file, resume).await? {
                LockOutcome::Locked => {}
                LockOutcome::Busy(other) => {
                    warn!(busy_file = %other.filename, "Another file is being processed");
                    return Ok(FileOutcome::Busy(other));
                }
                LockOutcome::Stale(status) => return Ok(FileOutcome::Skipped(status)),
            }

            match self.ingest_locked(file, &mut phase).await {
                Ok(StreamEnd::Finished(stats)) => {
                    info!(
                        lines = stats.total_lines,
                        added = stats.added,
                        modified = stats.modified,
                        unchanged = stats.unchanged,
                        ignored = stats.ignored,
                        rejected = stats.rejected,
                        repaired = stats.repaired,
                        resumed = stats.resumed,
                        deleted = stats.deleted,
                        undeleted = stats.undeleted,
                        duration_secs = stats.duration_secs,
                        "Snapshot processed"
                    );
                    Ok(FileOutcome::Processed(stats))
                }
                Ok(StreamEnd::Cancelled(stats)) => {
                    phase = Phase::Reset;
                    self.tracker.reset(file.id).await?;
                    warn!(phase = phase.as_str(), lines = stats.total_lines, "Processing cancelled");
                    Ok(FileOutcome::Cancelled(stats))
                }
                Err(e) => {
                    let failed_in = phase;
                    phase = phase.on_failure();
                    error!(
                        error = ?e,
                        failed_in = failed_in.as_str(),
                        phase = phase.as_str(),
                        "Processing failed"
                    );
                    if phase == Phase::Reset {
                        if let Err(reset_err) = self.tracker.reset(file.id).await {
                            error!(error = ?reset_err, "Failed to reset file after error");
                        }
                    }
                    Err(e.context(format!("Failed to process {}", file.filename)))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn ingest_locked(&self, file: &SourceFile, phase: &mut Phase) -> Result<StreamEnd> {
        *phase = Phase::Streaming;
        let config = &self.config;
        let mut stats = IngestStats::new();

        let checkpoint = self.tracker.checkpoint(file).await?;
        if checkpoint > 0 {
            info!(checkpoint, "Resuming after checkpoint");
        }

        let snapshot = open_snapshot(&file.filename)
            .with_context(|| format!("Failed to open {}", file.filename))?;
        let header = parse_header(&snapshot.header, config.delimiter)?;
        if !header.contains(&config.identifier_field) {
            anyhow::bail!(
                "Header of {} has no '{}' column",
                file.filename,
                config.identifier_field
            );
        }
        let reconciler = RowReconciler::new(header, config.delimiter);
        let excluded = config.hash_excluded_fields();

        let mut writer = BatchWriter::new(file.id, file.filename.clone(), config.batch_size);
        if checkpoint > 0 {
            // Bad lines right after the checkpoint keep growing the stored range
            if let Some(open) = bad_lines::ending_at(&self.pool, &file.filename, checkpoint).await? {
                writer.bad_lines().resume(open);
            }
        }
        let mut seen: HashSet<String> = HashSet::new();
        let pb = create_line_progress(snapshot.approx_lines, &file.short_filename(), self.quiet);

        for (index, line) in snapshot.lines.enumerate() {
            if self.cancel.is_cancelled() {
                writer.discard();
                pb.abandon();
                stats.complete();
                return Ok(StreamEnd::Cancelled(stats));
            }

            let line_no = index as i64 + 1;
            let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
            stats.total_lines += 1;
            pb.inc(1);

            let pending = line_no > checkpoint;

            let raw = match reconciler.reconcile(&line) {
                Reconciled::Exact(row) => row,
                Reconciled::Repaired { row, message } => {
                    if pending {
                        writer.bad_lines().warning(line_no, &line, message);
                        stats.inc_repaired();
                    }
                    row
                }
                Reconciled::Rejected { message } => {
                    if pending {
                        writer.bad_lines().error(line_no, &line, message);
                        stats.inc_rejected();
                    } else {
                        stats.inc_resumed();
                    }
                    self.flush_if_full(&mut writer, phase).await?;
                    continue;
                }
            };

            if let Some(ncid) = raw.get(&config.identifier_field) {
                seen.insert(ncid.clone());
            }

            if !pending {
                stats.inc_resumed();
                continue;
            }

            match self.process_row(file, &mut writer, &raw, line_no, &excluded).await {
                Ok(RowOutcome::Added) => stats.inc_added(),
                Ok(RowOutcome::Modified) => stats.inc_modified(),
                Ok(RowOutcome::Unchanged) => stats.inc_unchanged(),
                Ok(RowOutcome::Ignored) => stats.inc_ignored(),
                Err(RowFailure::Invalid(e)) => {
                    debug!(line_no, error = %e, "Rejected row");
                    writer.bad_lines().error(line_no, &line, &e.to_string());
                    stats.inc_rejected();
                }
                Err(RowFailure::Unexpected(e)) => {
                    warn!(line_no, error = ?e, "Unexpected error processing row");
                    writer.bad_lines().error(line_no, &line, &format!("{:?}", e));
                    stats.inc_rejected();
                }
                Err(RowFailure::Fatal(e)) => return Err(e),
            }

            self.flush_if_full(&mut writer, phase).await?;
        }

        *phase = Phase::Flushing;
        writer.bad_lines().finish();
        writer.flush(&self.pool).await?;
        pb.finish_and_clear();

        *phase = Phase::Finalizing;
        let sweep = self.tracker.complete(file.id, &seen).await?;
        stats.record_sweep(sweep);
        stats.complete();

        *phase = Phase::Done;
        Ok(StreamEnd::Finished(stats))
    }

    async fn flush_if_full(&self, writer: &mut BatchWriter, phase: &mut Phase) -> Result<()> {
        if writer.needs_flush() {
            *phase = Phase::Flushing;
            writer.flush(&self.pool).await?;
            *phase = Phase::Streaming;
        }
        Ok(())
    }

    /// Decide what one reconciled row means and queue the result
    async fn process_row(
        &self,
        file: &SourceFile,
        writer: &mut BatchWriter,
        raw: &RawRow,
        line_no: i64,
        excluded: &[&str],
    ) -> std::result::Result<RowOutcome, RowFailure> {
        let ncid = raw
            .get(&self.config.identifier_field)
            .ok_or_else(|| RowError::MissingIdentifier(self.config.identifier_field.clone()))?;

        // A second row for an unflushed voter must diff against durable state
        if writer.is_pending(ncid) {
            writer.flush(&self.pool).await.map_err(RowFailure::Fatal)?;
        }

        let hash = content_hash(raw, excluded);
        let voter = voters::find_by_ncid(&self.pool, ncid).await?;

        if let Some(ref voter) = voter {
            if changes::hash_exists(&self.pool, voter.id, &hash).await? {
                return Ok(RowOutcome::Unchanged);
            }
        }

        let parsed = parse_row(raw, &self.config)?;
        let snapshot_dt = parsed.snapshot_dt.unwrap_or(file.created);

        let Some(voter) = voter else {
            writer.queue_add(ncid, hash, snapshot_dt, line_no, parsed.data);
            return Ok(RowOutcome::Added);
        };

        let existing = match voter.data {
            Some(data) => data,
            None => replay(&changes::for_voter(&self.pool, voter.id).await?),
        };

        let delta = diff_rows(&existing, &parsed.data, &self.config.ignored_fields);
        if delta.is_empty() {
            return Ok(RowOutcome::Ignored);
        }

        let mut state = existing;
        merge_into(&mut state, &delta);
        writer.queue_modify(voter.id, ncid, hash, snapshot_dt, line_no, delta, state);
        Ok(RowOutcome::Modified)
    }
}
