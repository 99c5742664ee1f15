//! Advocacy Ingest - normalize activity files and upload them

use advocacy_common::logging::{init_logging, LogConfig, LogLevel};
use advocacy_ingest::cli::{Cli, Commands};
use advocacy_ingest::retry::connect_with_retry;
use advocacy_ingest::store::postgres;
use advocacy_ingest::{
    DestinationStore, IngestConfig, IngestResult, MemoryStore, PgStore, Pipeline, ProcessingState,
    RunOutcome, SelectionMode,
};
use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}

async fn execute(cli: Cli) -> Result<u8> {
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("advocacy-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env()?;
    cli.apply(&mut config)?;
    let pipeline = Pipeline::new(config)?;

    let outcome = match cli.command {
        Commands::Run { selection, dry_run } => {
            let mode = selection.mode()?;
            if dry_run {
                info!("Dry run: uploading into an in-memory destination");
                pipeline.run(&MemoryStore::new(), mode).await
            } else {
                match connect_store(pipeline.config()).await {
                    Ok(store) => pipeline.run(&store, mode).await,
                    Err(e) => RunOutcome::aborted(e),
                }
            }
        },
        Commands::Normalize { selection } => {
            let mode = selection.mode()?;
            let state = match (mode, pipeline.config().database_url.is_some()) {
                (SelectionMode::Incremental, true) => stored_state(&pipeline).await,
                _ => Ok(ProcessingState::default()),
            };
            match state {
                Ok(state) => pipeline.normalize_only(mode, &state),
                Err(e) => RunOutcome::aborted(e),
            }
        },
        Commands::Upload => match connect_store(pipeline.config()).await {
            Ok(store) => pipeline.upload_artifact(&store).await,
            Err(e) => RunOutcome::aborted(e),
        },
        Commands::Status => {
            status(&pipeline).await?;
            return Ok(0);
        },
    };

    Ok(report(&outcome))
}

/// Connect with bounded retry; exhaustion aborts before any batch
async fn connect_store(config: &IngestConfig) -> IngestResult<PgStore> {
    let url = config.require_database_url()?;
    let timeout = config.connect_timeout();
    let pool = connect_with_retry(&config.retry_policy(), || postgres::connect(url, timeout)).await?;
    PgStore::new(pool, config.table.clone())
}

/// Lineage from the destination, for incremental normalize-only runs
async fn stored_state(pipeline: &Pipeline) -> IngestResult<ProcessingState> {
    let store = connect_store(pipeline.config()).await?;
    store.ensure_schema().await?;
    pipeline.processing_state(&store).await
}

async fn status(pipeline: &Pipeline) -> Result<()> {
    let store = connect_store(pipeline.config()).await?;
    store.ensure_schema().await?;

    let state = pipeline.processing_state(&store).await?;
    let pending = pipeline.tracker().pending(&state)?.len();
    let summary = store.summary().await?;

    println!("Table:              {}", store.table());
    println!(
        "Max processed file: {}",
        state
            .max_processed
            .map_or_else(|| "none".to_string(), |n| n.to_string())
    );
    println!("Processed files:    {}", state.processed_files);
    println!("Pending files:      {}", pending);
    println!("Total rows:         {}", summary.total_rows);
    println!("Distinct users:     {}", summary.distinct_users);
    for (platform, rows) in &summary.platforms {
        println!("  {:<16} {}", platform, rows);
    }
    Ok(())
}

fn report(outcome: &RunOutcome) -> u8 {
    println!("{}", outcome.summary);
    if let Some(destination) = &outcome.destination {
        println!(
            "Destination:        {} rows, {} users",
            destination.total_rows, destination.distinct_users
        );
    }
    if let Some(error) = &outcome.fatal {
        eprintln!("Error: {}", error);
    }
    // Exit codes are 0 or 1
    outcome.exit_code() as u8
}
