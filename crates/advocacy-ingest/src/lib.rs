//! Advocacy Ingest Library
//!
//! Normalize-and-upload pipeline for per-advocate activity files.
//!
//! # Components
//!
//! - **Validation**: field-level checks and sanitizers ([`validation`])
//! - **Normalizer**: flattens one raw document into aggregated rows ([`normalizer`])
//! - **File state**: picks the files a run should process ([`file_state`])
//! - **Schema**: creates and verifies the destination table ([`schema`])
//! - **Uploader**: deduplicated, transactional batch writes ([`uploader`])
//!
//! # Example
//!
//! ```no_run
//! use advocacy_ingest::{IngestConfig, MemoryStore, Pipeline, SelectionMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(IngestConfig::from_env()?)?;
//!     let store = MemoryStore::new();
//!     let outcome = pipeline.run(&store, SelectionMode::Incremental).await;
//!     println!("{}", outcome.summary);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod file_state;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod stats;
pub mod store;
pub mod uploader;
pub mod validation;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult, RecordSkipError, ValidationError};
pub use file_state::{FileStateTracker, ProcessingState, SelectionMode};
pub use models::{NormalizedRecord, RawUserDocument, RecordKey};
pub use pipeline::{Pipeline, RunOutcome, RunSummary};
pub use store::{DestinationStore, MemoryStore, PgStore};
pub use uploader::{BatchUploader, UploadReport};
