//! PostgreSQL destination
//!
//! Batches are written with multi-row `INSERT`s inside a single transaction.
//! Statements are chunked to stay under PostgreSQL's 65,535 bind parameter
//! limit; the chunks share the batch's transaction.

use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{QueryBuilder, Row};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use super::{DestinationStore, DestinationSummary};
use crate::error::{IngestError, IngestResult};
use crate::models::{NormalizedRecord, RecordKey};
use crate::schema::SchemaManager;

/// Rows per `INSERT` statement (19 binds each)
const INSERT_CHUNK_SIZE: usize = 1000;

/// Keys per lookup statement (4 binds each)
const KEY_CHUNK_SIZE: usize = 1000;

/// Open a single-connection pool; the pipeline holds one session per run
pub async fn connect(url: &str, connect_timeout: Duration) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(connect_timeout)
        .connect(url)
        .await?;

    info!("Database connection established");
    Ok(pool)
}

/// Translate constraint failures into the pipeline's taxonomy
fn classify(error: sqlx::Error) -> IngestError {
    if let sqlx::Error::Database(db_error) = &error {
        if matches!(
            db_error.kind(),
            ErrorKind::UniqueViolation | ErrorKind::CheckViolation | ErrorKind::NotNullViolation
        ) {
            return IngestError::Constraint(db_error.message().to_string());
        }
    }
    IngestError::Database(error)
}

/// [`DestinationStore`] backed by a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: SchemaManager,
}

impl PgStore {
    pub fn new(pool: PgPool, table: impl Into<String>) -> IngestResult<Self> {
        let schema = SchemaManager::new(pool.clone(), table)?;
        Ok(Self { pool, schema })
    }

    pub fn table(&self) -> &str {
        self.schema.table()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_chunk(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        rows: &[NormalizedRecord],
    ) -> IngestResult<u64> {
        let mut query_builder = QueryBuilder::new(format!(
            r#"
            INSERT INTO {} (
                user_id, name, email, email_valid, instagram_handle, tiktok_handle,
                platform, program_id, brand, tasks_completed, total_likes,
                total_comments, total_shares, total_reach, total_sales_attributed,
                joined_at, source_file, issues, invalid_post_urls
            )
            "#,
            self.table()
        ));

        query_builder.push_values(rows.iter(), |mut b, row| {
            b.push_bind(&row.user_id)
                .push_bind(&row.name)
                .push_bind(&row.email)
                .push_bind(row.email_valid)
                .push_bind(&row.instagram_handle)
                .push_bind(&row.tiktok_handle)
                .push_bind(&row.platform)
                .push_bind(&row.program_id)
                .push_bind(&row.brand)
                .push_bind(row.tasks_completed)
                .push_bind(row.total_likes)
                .push_bind(row.total_comments)
                .push_bind(row.total_shares)
                .push_bind(row.total_reach)
                .push_bind(row.total_sales_attributed)
                .push_bind(row.joined_at)
                .push_bind(&row.source_file)
                .push_bind(row.issues)
                .push_bind(row.invalid_post_urls);
        });

        let result = query_builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(classify)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DestinationStore for PgStore {
    async fn ensure_schema(&self) -> IngestResult<()> {
        self.schema.ensure_schema().await
    }

    async fn processed_source_files(&self) -> IngestResult<Vec<String>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT source_file FROM {} ORDER BY source_file",
            self.table()
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in rows {
            files.push(row.try_get::<String, _>("source_file")?);
        }
        Ok(files)
    }

    async fn existing_keys(&self, keys: &[RecordKey]) -> IngestResult<HashSet<RecordKey>> {
        let mut existing = HashSet::new();

        for chunk in keys.chunks(KEY_CHUNK_SIZE) {
            let mut query_builder = QueryBuilder::new(format!(
                "SELECT user_id, program_id, platform, source_file FROM {} \
                 WHERE (user_id, program_id, platform, source_file) IN ",
                self.table()
            ));
            query_builder.push_tuples(chunk.iter(), |mut b, key| {
                b.push_bind(&key.user_id)
                    .push_bind(&key.program_id)
                    .push_bind(&key.platform)
                    .push_bind(&key.source_file);
            });

            let rows = query_builder.build().fetch_all(&self.pool).await?;
            for row in rows {
                existing.insert(RecordKey {
                    user_id: row.try_get("user_id")?,
                    program_id: row.try_get("program_id")?,
                    platform: row.try_get("platform")?,
                    source_file: row.try_get("source_file")?,
                });
            }
        }

        debug!(checked = keys.len(), existing = existing.len(), "Checked existing keys");
        Ok(existing)
    }

    async fn insert_batch(&self, rows: &[NormalizedRecord]) -> IngestResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            // Dropping `tx` on error rolls the whole batch back
            inserted += self.insert_chunk(&mut tx, chunk).await?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(inserted)
    }

    async fn summary(&self) -> IngestResult<DestinationSummary> {
        let totals = sqlx::query(&format!(
            "SELECT COUNT(*) AS total_rows, COUNT(DISTINCT user_id) AS distinct_users FROM {}",
            self.table()
        ))
        .fetch_one(&self.pool)
        .await?;

        let breakdown = sqlx::query(&format!(
            "SELECT platform, COUNT(*) AS row_count FROM {} GROUP BY platform ORDER BY platform",
            self.table()
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut platforms = BTreeMap::new();
        for row in breakdown {
            let platform: String = row.try_get("platform")?;
            let count: i64 = row.try_get("row_count")?;
            platforms.insert(platform, count.max(0) as u64);
        }

        Ok(DestinationSummary {
            total_rows: totals.try_get::<i64, _>("total_rows")?.max(0) as u64,
            distinct_users: totals.try_get::<i64, _>("distinct_users")?.max(0) as u64,
            platforms,
        })
    }
}
