//! Registering local snapshot files as ingestion jobs
//!
//! Paths are expanded (directories contribute their regular files), ordered
//! by the date embedded in the path, fingerprinted with MD5 and inserted as
//! UNPROCESSED jobs. A fingerprint that is already known is skipped, so the
//! same content is registered at most once.

use crate::db::files;
use crate::models::{DataFileKind, FileStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use ncvoter_common::checksum::compute_file_md5;
use regex::Regex;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATE_PATTERN: &str =
    r"(?:^|\D)(?:(\d{4})-(\d{2})-(\d{2})|(\d{4})(\d{2})(\d{2}))(?:\D|$)";

/// What happened to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added(i64),
    /// Known file put back in the queue by `--reset`
    Requeued(i64),
    /// Content already registered under this id
    Skipped(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub path: PathBuf,
    pub declared: Option<NaiveDate>,
    pub outcome: Registration,
}

/// A file to register, with its declared date
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Candidate {
    pub declared: Option<NaiveDate>,
    pub path: PathBuf,
}

/// Snapshot date embedded in a path as `YYYYMMDD` or `YYYY-MM-DD`, looking
/// at the file name first and then its parents
pub fn declared_date(path: &Path, pattern: &Regex) -> Option<NaiveDate> {
    path.components().rev().find_map(|component| {
        let text = component.as_os_str().to_string_lossy();
        pattern.captures_iter(&text).find_map(|caps| {
            let (y, m, d) = match (caps.get(1), caps.get(4)) {
                (Some(_), _) => (&caps[1], &caps[2], &caps[3]),
                (None, Some(_)) => (&caps[4], &caps[5], &caps[6]),
                (None, None) => return None,
            };
            NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
        })
    })
}

/// Expand directories and order files oldest declared date first.
/// Undated files come last, by path.
pub fn collect_snapshots(paths: &[PathBuf]) -> Result<Vec<Candidate>> {
    let pattern = Regex::new(DATE_PATTERN)?;
    let mut found = Vec::new();

    for path in paths {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Cannot access {}", path.display()))?;
        if meta.is_dir() {
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("Failed to list {}", path.display()))?
            {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    found.push(entry.path());
                }
            }
        } else {
            found.push(path.clone());
        }
    }

    let mut candidates: Vec<Candidate> = found
        .into_iter()
        .map(|path| Candidate {
            declared: declared_date(&path, &pattern),
            path,
        })
        .collect();
    candidates.sort_by(|a, b| {
        (a.declared.is_none(), a.declared, &a.path).cmp(&(b.declared.is_none(), b.declared, &b.path))
    });
    candidates.dedup_by(|a, b| a.path == b.path);
    Ok(candidates)
}

fn declared_timestamp(date: Option<NaiveDate>) -> DateTime<Utc> {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now)
}

/// Register snapshot files as jobs of `kind`.
///
/// With `reset`, every existing job is cancelled first and the given files
/// are queued again even when already known.
pub async fn add_files(
    pool: &SqlitePool,
    paths: &[PathBuf],
    kind: DataFileKind,
    reset: bool,
) -> Result<Vec<Registered>> {
    let candidates = collect_snapshots(paths)?;

    let mut fingerprinted = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let path = std::fs::canonicalize(&candidate.path)
            .with_context(|| format!("Cannot resolve {}", candidate.path.display()))?;
        let hash_path = path.clone();
        let etag = tokio::task::spawn_blocking(move || compute_file_md5(hash_path))
            .await
            .context("Fingerprint task failed")?
            .with_context(|| format!("Failed to fingerprint {}", path.display()))?;
        debug!(path = %path.display(), %etag, "Fingerprinted snapshot");
        fingerprinted.push((path, candidate.declared, etag));
    }

    let mut tx = pool.begin().await.context("Failed to begin registration")?;

    if reset {
        if let Some(busy) = files::list(&mut *tx, Some(FileStatus::Processing)).await?.into_iter().next() {
            anyhow::bail!("Cannot reset while {} is being processed", busy.filename);
        }
        let cancelled = files::cancel_all(&mut *tx).await?;
        warn!(cancelled, "Cancelled existing jobs");
    }

    let mut results = Vec::with_capacity(fingerprinted.len());
    for (path, declared, etag) in fingerprinted {
        let filename = path.to_string_lossy().into_owned();

        let existing = match files::find_by_etag(&mut *tx, &etag).await? {
            Some(file) => Some(file),
            None => files::find_by_filename(&mut *tx, &filename).await?,
        };

        let outcome = match existing {
            Some(file) if reset => {
                files::set_status(&mut *tx, file.id, FileStatus::Unprocessed).await?;
                Registration::Requeued(file.id)
            }
            Some(file) => {
                if file.etag != etag {
                    warn!(filename = %filename, "Path already registered with different content");
                }
                Registration::Skipped(file.id)
            }
            None => {
                let id = files::insert(&mut *tx, &etag, &filename, kind, declared_timestamp(declared)).await?;
                Registration::Added(id)
            }
        };

        results.push(Registered {
            path,
            declared,
            outcome,
        });
    }

    tx.commit().await.context("Failed to commit registration")?;

    info!(
        added = results.iter().filter(|r| matches!(r.outcome, Registration::Added(_))).count(),
        requeued = results.iter().filter(|r| matches!(r.outcome, Registration::Requeued(_))).count(),
        skipped = results.iter().filter(|r| matches!(r.outcome, Registration::Skipped(_))).count(),
        "Registered snapshot files"
    );
    Ok(results)
}
