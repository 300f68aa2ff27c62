//! `ncvoter-ingest drop-files` command implementation
//!
//! Lists the snapshot files of finished jobs and reclaims their disk space.

use super::report_table;
use crate::db::files;
use crate::models::{FileStatus, SourceFile};
use anyhow::{Context, Result};
use colored::Colorize;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// A registered file and whether it is still on disk
#[derive(Debug, Clone, PartialEq)]
pub struct FileOnDisk {
    pub file: SourceFile,
    pub exists: bool,
}

/// Processed files, or every file with `all`
pub async fn candidates(pool: &SqlitePool, all: bool) -> Result<Vec<FileOnDisk>> {
    let status = if all { None } else { Some(FileStatus::Processed) };
    Ok(files::list(pool, status)
        .await?
        .into_iter()
        .map(|file| FileOnDisk {
            exists: Path::new(&file.filename).is_file(),
            file,
        })
        .collect())
}

/// Delete the existing files among `found`, never one still being processed.
/// Returns how many were removed.
pub fn delete_files(found: &[FileOnDisk]) -> Result<usize> {
    let mut removed = 0;
    for entry in found {
        if !entry.exists || entry.file.file_status == FileStatus::Processing {
            continue;
        }
        std::fs::remove_file(&entry.file.filename)
            .with_context(|| format!("Failed to delete {}", entry.file.filename))?;
        info!(file_id = entry.file.id, filename = %entry.file.filename, "Deleted snapshot file");
        removed += 1;
    }
    Ok(removed)
}

pub async fn run(pool: &SqlitePool, delete: bool, all: bool) -> Result<()> {
    let found = candidates(pool, all).await?;

    if found.is_empty() {
        println!("No files to drop.");
        return Ok(());
    }

    let mut table = report_table(vec!["Id", "File", "Status", "On disk"]);
    for entry in &found {
        let marker = if entry.exists { "exists".green() } else { "missing".red() };
        table.add_row(vec![
            entry.file.id.to_string(),
            entry.file.filename.clone(),
            entry.file.file_status.to_string(),
            marker.to_string(),
        ]);
    }
    println!("{}", table);

    if delete {
        let removed = delete_files(&found)?;
        println!("{} Deleted {} file(s)", "✓".green(), removed);
    } else {
        println!("Use --delete to remove the files listed as existing");
    }
    Ok(())
}
