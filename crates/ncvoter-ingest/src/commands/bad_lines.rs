//! `ncvoter-ingest bad-lines` command implementation

use super::{report_table, truncate};
use crate::db::bad_lines;
use anyhow::Result;
use colored::Colorize;
use sqlx::SqlitePool;

pub async fn run(pool: &SqlitePool, filename: Option<&str>) -> Result<()> {
    let ranges = bad_lines::list(pool, filename).await?;

    if ranges.is_empty() {
        println!("No bad lines recorded.");
        return Ok(());
    }

    let mut table = report_table(vec!["File", "Lines", "Count", "Severity", "Message", "Example"]);
    for range in &ranges {
        let severity = if range.is_warning { "warning".yellow() } else { "error".red() };
        table.add_row(vec![
            range.filename.clone(),
            format!("{}-{}", range.first_line_no, range.last_line_no),
            range.len().to_string(),
            severity.to_string(),
            truncate(&range.message, 60),
            truncate(&range.example_line.replace('\t', " "), 40),
        ]);
    }

    println!("{}", table);
    println!(
        "{} range(s), {} line(s)",
        ranges.len(),
        ranges.iter().map(|r| r.len()).sum::<i64>()
    );
    Ok(())
}
