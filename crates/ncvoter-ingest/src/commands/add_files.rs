//! `ncvoter-ingest add-files` command implementation

use super::report_table;
use crate::models::DataFileKind;
use crate::registry::{add_files, Registration};
use anyhow::Result;
use colored::Colorize;
use sqlx::SqlitePool;
use std::path::PathBuf;

/// Register snapshot files and print what happened to each
pub async fn run(pool: &SqlitePool, paths: &[PathBuf], kind: DataFileKind, reset: bool) -> Result<()> {
    let results = add_files(pool, paths, kind, reset).await?;

    if results.is_empty() {
        println!("No files found.");
        return Ok(());
    }

    let mut table = report_table(vec!["Id", "File", "Declared", "Result"]);
    for registered in &results {
        let (id, label) = match registered.outcome {
            Registration::Added(id) => (id, "added".green()),
            Registration::Requeued(id) => (id, "requeued".cyan()),
            Registration::Skipped(id) => (id, "already registered".yellow()),
        };
        table.add_row(vec![
            id.to_string(),
            registered.path.display().to_string(),
            registered
                .declared
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            label.to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}
