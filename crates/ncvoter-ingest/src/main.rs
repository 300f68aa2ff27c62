//! NCVoter ingest - Main entry point

use anyhow::Context;
use clap::Parser;
use ncvoter_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use ncvoter_ingest::{commands, db, Cli, Commands, Config};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Quiet runs only report warnings; verbose runs add debug output
    let level = if cli.verbose {
        LogLevel::Debug
    } else if cli.command.is_quiet() {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };
    let mut log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("ncvoter-ingest")
        .build();

    // Environment variables take precedence
    if let Err(e) = log_config.merge_env() {
        eprintln!("Ignoring invalid logging environment: {}", e);
    }

    // Keep the guard alive so file logs are flushed on exit
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    if let Err(e) = execute_command(cli).await {
        error!(error = ?e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    let pool = db::connect(&config.database).await?;

    match cli.command {
        Commands::Process { resume, quiet } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; stopping after the current line");
                    on_interrupt.cancel();
                }
            });

            commands::process::run(pool.clone(), config.ingest, resume, quiet, cancel).await?
        }

        Commands::AddFiles { paths, reset, kind } => {
            commands::add_files::run(&pool, &paths, kind, reset).await?
        }

        Commands::RemoveChanges { file_id } => commands::remove_changes::run(&pool, file_id).await?,

        Commands::DropFiles { delete, all } => commands::drop_files::run(&pool, delete, all).await?,

        Commands::BadLines { filename } => {
            commands::bad_lines::run(&pool, filename.as_deref()).await?
        }

        Commands::Show { ncid, changelog } => commands::show::run(&pool, &ncid, changelog).await?,
    }

    pool.close().await;
    Ok(())
}
