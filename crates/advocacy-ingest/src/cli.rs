//! Command-line interface definition
//!
//! Kept in the library so `xtask` can render it with `clap-markdown`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::file_state::SelectionMode;

/// Advocacy activity ingest - normalize per-user files and upload them
#[derive(Parser, Debug)]
#[command(name = "advocacy-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding the per-user source files
    #[arg(long, env = "INGEST_INPUT_DIR", global = true)]
    pub input_dir: Option<PathBuf>,

    /// Path of the staged normalized artifact
    #[arg(long, env = "INGEST_ARTIFACT_PATH", global = true)]
    pub artifact: Option<PathBuf>,

    /// Rows per transactional batch
    #[arg(long, env = "INGEST_BATCH_SIZE", global = true)]
    pub batch_size: Option<usize>,

    /// Destination table
    #[arg(long, env = "INGEST_TABLE", global = true)]
    pub table: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Select, normalize, stage and upload new files
    Run {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Upload into an in-memory destination instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Select and normalize files, writing the artifact and statistics only
    Normalize {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Upload a previously staged artifact
    Upload,

    /// Show destination lineage and row statistics
    Status,
}

/// File selection flags; incremental when none are given
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Ignore stored lineage and process every file
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub full: bool,

    /// First sequence index to process (inclusive)
    #[arg(long, requires = "end")]
    pub start: Option<u64>,

    /// Sequence index to stop before (exclusive)
    #[arg(long, requires = "start")]
    pub end: Option<u64>,
}

impl SelectionArgs {
    pub fn mode(&self) -> IngestResult<SelectionMode> {
        match (self.full, self.start, self.end) {
            (true, _, _) => Ok(SelectionMode::Full),
            (false, Some(start), Some(end)) if start < end => Ok(SelectionMode::Range { start, end }),
            (false, Some(start), Some(end)) => Err(IngestError::config(format!(
                "--start ({}) must be less than --end ({})",
                start, end
            ))),
            (false, None, None) => Ok(SelectionMode::Incremental),
            _ => Err(IngestError::config("--start and --end must be given together")),
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut IngestConfig) -> IngestResult<()> {
        if let Some(dir) = &self.input_dir {
            config.input_dir.clone_from(dir);
        }
        if let Some(path) = &self.artifact {
            config.artifact_path.clone_from(path);
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(table) = &self.table {
            config.table.clone_from(table);
        }
        config.validate()
    }
}
