//! Destination store interface
//!
//! The uploader only talks to a [`DestinationStore`]. [`postgres::PgStore`] is
//! the production backend; [`memory::MemoryStore`] keeps rows in process for
//! dry runs and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::IngestResult;
use crate::models::{NormalizedRecord, RecordKey};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Row counts reported after an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestinationSummary {
    pub total_rows: u64,
    pub distinct_users: u64,
    /// Rows per platform, ordered by platform name
    pub platforms: BTreeMap<String, u64>,
}

/// Relational destination for normalized rows
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Create the destination table if absent and verify its shape
    async fn ensure_schema(&self) -> IngestResult<()>;

    /// Distinct `source_file` values already stored (lineage)
    async fn processed_source_files(&self) -> IngestResult<Vec<String>>;

    /// Subset of `keys` already present in the destination
    async fn existing_keys(&self, keys: &[RecordKey]) -> IngestResult<HashSet<RecordKey>>;

    /// Insert every row in one transaction
    ///
    /// Either all rows are committed or none are.
    async fn insert_batch(&self, rows: &[NormalizedRecord]) -> IngestResult<u64>;

    /// Post-upload row statistics
    async fn summary(&self) -> IngestResult<DestinationSummary>;
}
