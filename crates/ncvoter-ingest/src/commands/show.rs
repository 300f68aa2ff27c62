//! `ncvoter-ingest show` command implementation
//!
//! Prints the replayed state of one registrant and, optionally, its change
//! log with cleared fields marked.

use super::report_table;
use crate::db::voters;
use crate::diff::cleared_fields;
use crate::models::{ChangeRecord, OpCode};
use anyhow::Result;
use colored::Colorize;
use ncvoter_common::VoterError;
use sqlx::SqlitePool;

pub async fn run(pool: &SqlitePool, ncid: &str, changelog: bool) -> Result<()> {
    let voter = voters::find_by_ncid(pool, ncid)
        .await?
        .ok_or_else(|| VoterError::VoterNotFound(ncid.to_string()))?;
    let state = voters::current_state(pool, ncid).await?.unwrap_or_default();

    let status = if voter.deleted { "deleted".red() } else { "active".green() };
    println!("{} {} ({})", "Voter".cyan().bold(), ncid.bold(), status);

    let mut table = report_table(vec!["Field", "Value"]);
    for (field, value) in &state {
        table.add_row(vec![field.clone(), value.to_string()]);
    }
    println!("{}", table);

    if changelog {
        let log = voters::changelog(pool, ncid).await?;
        println!();
        println!("{} ({} record(s))", "Change log:".cyan().bold(), log.len());
        for record in &log {
            print_change(record);
        }
    }
    Ok(())
}

fn print_change(record: &ChangeRecord) {
    let op = match record.op_code {
        OpCode::Add => "ADD".green(),
        OpCode::Modify => "MODIFY".yellow(),
    };
    println!(
        "{} {} (file {}, line {})",
        record.snapshot_dt.format("%Y-%m-%d"),
        op,
        record.file_id,
        record.file_lineno
    );

    for (field, value) in &record.data {
        if !value.is_tombstone() {
            println!("    {} = {}", field, value);
        }
    }
    for field in cleared_fields(&record.data) {
        println!("    {} {}", field, "(cleared)".dimmed());
    }
}
