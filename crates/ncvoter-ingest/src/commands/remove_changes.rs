//! `ncvoter-ingest remove-changes` command implementation

use crate::rollback::remove_changes;
use anyhow::Result;
use colored::Colorize;
use sqlx::SqlitePool;

pub async fn run(pool: &SqlitePool, file_id: i64) -> Result<()> {
    let stats = remove_changes(pool, file_id).await?;

    println!("{} Rolled back source file {}", "✓".green(), file_id);
    println!("  Change records removed:  {}", stats.changes_removed);
    println!("  Voters rebuilt:          {}", stats.voters_rebuilt);
    println!("  Voters removed:          {}", stats.voters_removed);
    println!("  Bad-line ranges removed: {}", stats.bad_lines_removed);
    Ok(())
}
