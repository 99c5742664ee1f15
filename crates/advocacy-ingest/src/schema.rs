//! Destination table creation and shape verification
//!
//! `ensure_schema` is idempotent: it creates the table and its dedup index when
//! absent, then compares `information_schema.columns` against the expected
//! column set. Existing incompatible tables are never altered.

use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::config::is_valid_table_name;
use crate::error::{IngestError, IngestResult};

/// Expected `(column, information_schema data_type)` pairs
pub const EXPECTED_COLUMNS: &[(&str, &str)] = &[
    ("id", "bigint"),
    ("user_id", "text"),
    ("name", "text"),
    ("email", "text"),
    ("email_valid", "boolean"),
    ("instagram_handle", "text"),
    ("tiktok_handle", "text"),
    ("platform", "text"),
    ("program_id", "text"),
    ("brand", "text"),
    ("tasks_completed", "integer"),
    ("total_likes", "bigint"),
    ("total_comments", "bigint"),
    ("total_shares", "bigint"),
    ("total_reach", "bigint"),
    ("total_sales_attributed", "double precision"),
    ("joined_at", "timestamp with time zone"),
    ("source_file", "text"),
    ("issues", "integer"),
    ("invalid_post_urls", "integer"),
    ("processed_at", "timestamp with time zone"),
];

/// DDL for the destination table and its composite-key unique index
pub fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            email_valid BOOLEAN NOT NULL DEFAULT FALSE,
            instagram_handle TEXT,
            tiktok_handle TEXT,
            platform TEXT NOT NULL,
            program_id TEXT NOT NULL,
            brand TEXT,
            tasks_completed INTEGER NOT NULL CHECK (tasks_completed >= 0),
            total_likes BIGINT NOT NULL CHECK (total_likes >= 0),
            total_comments BIGINT NOT NULL CHECK (total_comments >= 0),
            total_shares BIGINT NOT NULL CHECK (total_shares >= 0),
            total_reach BIGINT NOT NULL CHECK (total_reach >= 0),
            total_sales_attributed DOUBLE PRECISION NOT NULL CHECK (total_sales_attributed >= 0),
            joined_at TIMESTAMPTZ,
            source_file TEXT NOT NULL,
            issues INTEGER NOT NULL DEFAULT 0,
            invalid_post_urls INTEGER NOT NULL DEFAULT 0,
            processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
    )
}

fn create_index_sql(table: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {table}_dedup_key \
         ON {table} (user_id, program_id, platform, source_file)"
    )
}

/// Compare the live column set with [`EXPECTED_COLUMNS`]
///
/// Extra columns are tolerated. A missing column or a differing type is a
/// fatal [`IngestError::Schema`].
pub fn check_shape(table: &str, actual: &[(String, String)]) -> IngestResult<()> {
    let mut problems = Vec::new();

    for (column, expected_type) in EXPECTED_COLUMNS {
        match actual.iter().find(|(name, _)| name == column) {
            None => problems.push(format!("missing column '{}'", column)),
            Some((_, data_type)) if data_type != expected_type => problems.push(format!(
                "column '{}' is {}, expected {}",
                column, data_type, expected_type
            )),
            Some(_) => {},
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(IngestError::Schema(format!("table '{}': {}", table, problems.join("; "))))
    }
}

/// Owns the destination table's DDL
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
    table: String,
}

impl SchemaManager {
    pub fn new(pool: PgPool, table: impl Into<String>) -> IngestResult<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(IngestError::config(format!("invalid table name '{}'", table)));
        }
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table if absent and verify its shape
    pub async fn ensure_schema(&self) -> IngestResult<()> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await?;

        let columns = self.live_columns().await?;
        check_shape(&self.table, &columns)?;

        sqlx::query(&create_index_sql(&self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IngestError::Schema(format!(
                    "could not enforce unique (user_id, program_id, platform, source_file) on '{}': {}",
                    self.table, e
                ))
            })?;

        info!(table = %self.table, columns = columns.len(), "Destination schema verified");
        Ok(())
    }

    async fn live_columns(&self) -> IngestResult<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(&self.table)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            columns.push((name, data_type));
        }

        debug!(table = %self.table, ?columns, "Read live columns");
        Ok(columns)
    }
}
