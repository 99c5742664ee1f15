//! Build automation tasks for the advocacy ingest workspace
//!
//! Currently renders the `advocacy-ingest` CLI reference from its clap
//! definition.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for advocacy-ingest", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<advocacy_ingest::cli::Cli>();

    let content = format!(
        r#"# advocacy-ingest CLI Reference

Generated from the CLI source code on {}.

## Overview

`advocacy-ingest` validates and flattens per-advocate activity files
(`user_<n>.json`) and commits the resulting rows exactly once into a
PostgreSQL table. Runs are incremental by default: files after the highest
sequence index already stored are processed.

## Quick Start

```bash
# Normalize only, writing processed_data.json and data_statistics.json
advocacy-ingest normalize --full

# Incremental run against the database
DATABASE_URL=postgres://localhost/advocacy advocacy-ingest run

# Re-process a fixed range of files; rows already stored are skipped
advocacy-ingest run --start 100 --end 200

# Show stored lineage and row counts
advocacy-ingest status
```

## Commands

{}

## Environment Variables

- `DATABASE_URL` (or `HEROKU_DATABASE_URL`) - destination connection string
- `INGEST_INPUT_DIR` - source directory (default: `./mixed`)
- `INGEST_ARTIFACT_PATH` - staged artifact (default: `./processed_data.json`)
- `INGEST_STATS_PATH` - statistics report (default: `./data_statistics.json`)
- `INGEST_TABLE` - destination table (default: `processed_data`)
- `INGEST_BATCH_SIZE` - rows per transaction (default: `1000`)
- `INGEST_RETRY_MAX_ATTEMPTS`, `INGEST_RETRY_BASE_DELAY_MS`, `INGEST_RETRY_MAX_DELAY_MS` - connection backoff
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR` - logging

## Exit Codes

- `0` - success, including runs with nothing new to insert
- `1` - connection, schema or batch failure

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
