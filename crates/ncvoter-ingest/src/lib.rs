//! NCVoter Ingest Library
//!
//! Change-data-capture ingestion of statewide voter registration snapshots.
//!
//! # Overview
//!
//! Each snapshot is a full export of the registry. Instead of re-importing
//! it, every row is compared with what is already known about that
//! registrant and only the differences are stored:
//!
//! - **Decoding**: UTF-16 or Latin-1 text, streamed line by line ([`decoder`])
//! - **Reconciliation**: known column drift is repaired, other malformed
//!   lines are quarantined as bad-line ranges ([`reconciler`], [`bad_lines`])
//! - **Change detection**: content hashes and field-level diffs with
//!   tombstones for cleared fields ([`hasher`], [`diff`])
//! - **Storage**: batched, transactional writes to SQLite ([`batch`], [`db`])
//! - **Jobs**: one job per file with locking, resume and a presence sweep
//!   ([`jobs`], [`pipeline`])
//!
//! The current state of a registrant is always the replay of its change log.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod bad_lines;
pub mod batch;
pub mod commands;
pub mod config;
pub mod db;
pub mod decoder;
pub mod diff;
pub mod error;
pub mod hasher;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod reconciler;
pub mod registry;
pub mod rollback;
pub mod schema;

// Re-export commonly used types
pub use config::{Config, IngestConfig};
pub use error::{RowError, RowFailure};
pub use jobs::IngestStats;
pub use pipeline::{IngestPipeline, RunOutcome};

use clap::{Parser, Subcommand};
use models::DataFileKind;
use std::path::PathBuf;

/// NCVoter - change-data-capture for voter registration snapshots
#[derive(Parser, Debug)]
#[command(name = "ncvoter-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest every registered, unprocessed snapshot
    Process {
        /// Continue files left in progress from their checkpoint
        #[arg(long)]
        resume: bool,

        /// Suppress progress and diagnostic output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Register snapshot files or directories for processing
    AddFiles {
        /// Files or directories holding snapshots
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Cancel all existing jobs and queue these files again
        #[arg(long)]
        reset: bool,

        /// Kind of data file
        #[arg(long, value_enum, default_value_t = DataFileKind::NCVoter)]
        kind: DataFileKind,
    },

    /// Roll back the change records of the latest processed file
    RemoveChanges {
        /// Source file id
        file_id: i64,
    },

    /// List processed files and optionally delete them from disk
    DropFiles {
        /// Delete the files
        #[arg(long)]
        delete: bool,

        /// Consider every registered file, not only processed ones
        #[arg(long)]
        all: bool,
    },

    /// List recorded bad-line ranges
    BadLines {
        /// Only ranges of this file
        #[arg(long)]
        filename: Option<String>,
    },

    /// Show the current state of a registrant
    Show {
        /// Registrant identifier
        ncid: String,

        /// Also print the change log
        #[arg(long)]
        changelog: bool,
    },
}

impl Commands {
    /// Whether the command asked for quiet output
    pub fn is_quiet(&self) -> bool {
        matches!(self, Commands::Process { quiet: true, .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_process() {
        let cli = Cli::try_parse_from(["ncvoter-ingest", "process", "--resume", "-q"]).unwrap();
        match cli.command {
            Commands::Process { resume, quiet } => {
                assert!(resume);
                assert!(quiet);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["ncvoter-ingest", "process", "-q"]).unwrap().command.is_quiet());
    }

    #[test]
    fn test_parse_add_files_kind() {
        let cli = Cli::try_parse_from(["ncvoter-ingest", "add-files", "a.txt", "--kind", "ncvhis"]).unwrap();
        match cli.command {
            Commands::AddFiles { paths, reset, kind } => {
                assert_eq!(paths, vec![PathBuf::from("a.txt")]);
                assert!(!reset);
                assert_eq!(kind, DataFileKind::NCVHis);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
