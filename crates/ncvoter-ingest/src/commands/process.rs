//! `ncvoter-ingest process` command implementation
//!
//! Ingests every registered snapshot that is waiting, oldest first.

use super::report_table;
use crate::config::IngestConfig;
use crate::jobs::IngestStats;
use crate::pipeline::{IngestPipeline, RunOutcome};
use anyhow::Result;
use colored::Colorize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

/// Run the pipeline and print a summary
pub async fn run(
    pool: SqlitePool,
    config: IngestConfig,
    resume: bool,
    quiet: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let pipeline = IngestPipeline::new(pool, config)
        .with_cancellation(cancel)
        .quiet(quiet);

    let outcome = pipeline.process_files(resume).await?;

    match &outcome {
        RunOutcome::Completed { files, .. } if *files == 0 => {
            if !quiet {
                println!("No files waiting to be processed.");
            }
            return Ok(());
        }
        RunOutcome::Completed { files, .. } => {
            if !quiet {
                println!("{} Processed {} file(s)", "✓".green(), files);
            }
        }
        RunOutcome::Busy { processing, .. } => {
            println!(
                "{} {} is being processed; run again later or use --resume",
                "!".yellow(),
                processing.filename
            );
        }
        RunOutcome::Cancelled { files, .. } => {
            println!(
                "{} Cancelled after {} complete file(s); the current file was reset",
                "!".yellow(),
                files
            );
        }
    }

    if !quiet {
        print_summary(outcome.stats());
    }
    Ok(())
}

fn print_summary(stats: &IngestStats) {
    let mut table = report_table(vec!["Metric", "Count"]);
    let rows: [(&str, i64); 10] = [
        ("Lines read", stats.total_lines),
        ("Added", stats.added),
        ("Modified", stats.modified),
        ("Unchanged", stats.unchanged),
        ("Ignored-only changes", stats.ignored),
        ("Rejected lines", stats.rejected),
        ("Repaired lines", stats.repaired),
        ("Skipped (resume)", stats.resumed),
        ("Marked deleted", stats.deleted),
        ("Undeleted", stats.undeleted),
    ];
    for (label, count) in rows {
        table.add_row(vec![label.to_string(), count.to_string()]);
    }

    println!();
    println!("{}", table);
    println!(
        "  {:.1}s, {:.0} lines/s",
        stats.duration_secs,
        stats.lines_per_second()
    );
}
