//! PostgreSQL destination tests using SQLx
//!
//! Run with `cargo test --features postgres-tests` and `DATABASE_URL` pointing
//! at a server where the test user may create databases. Each test gets a
//! fresh database from `#[sqlx::test]`.

#![cfg(feature = "postgres-tests")]

use advocacy_ingest::store::DestinationStore;
use advocacy_ingest::{BatchUploader, IngestError, NormalizedRecord, PgStore};
use sqlx::PgPool;

fn record(user: &str, platform: &str, file: &str) -> NormalizedRecord {
    NormalizedRecord {
        user_id: user.to_string(),
        name: format!("Advocate {}", user),
        email: format!("{}@example.com", user),
        email_valid: true,
        instagram_handle: Some(user.to_string()),
        tiktok_handle: None,
        platform: platform.to_string(),
        program_id: "spring".to_string(),
        brand: Some("Acme".to_string()),
        tasks_completed: 2,
        total_likes: 120,
        total_comments: 8,
        total_shares: 3,
        total_reach: 4000,
        total_sales_attributed: 99.5,
        joined_at: None,
        source_file: file.to_string(),
        issues: 0,
        invalid_post_urls: 0,
    }
}

// ============================================================================
// Schema Tests
// ============================================================================

#[sqlx::test(migrations = false)]
async fn test_ensure_schema_is_idempotent(pool: PgPool) -> sqlx::Result<()> {
    let store = PgStore::new(pool.clone(), "processed_data").unwrap();
    store.ensure_schema().await.unwrap();
    store.ensure_schema().await.unwrap();

    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'processed_data'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(count, 1);

    Ok(())
}

#[sqlx::test(migrations = false)]
async fn test_incompatible_table_is_schema_error(pool: PgPool) -> sqlx::Result<()> {
    sqlx::query("CREATE TABLE processed_data (id SERIAL PRIMARY KEY, user_id INTEGER)")
        .execute(&pool)
        .await?;

    let store = PgStore::new(pool, "processed_data").unwrap();
    let err = store.ensure_schema().await.unwrap_err();
    assert!(matches!(err, IngestError::Schema(_)), "got {:?}", err);

    Ok(())
}

// ============================================================================
// Upload Tests
// ============================================================================

#[sqlx::test(migrations = false)]
async fn test_lineage_dedup_and_summary(pool: PgPool) -> sqlx::Result<()> {
    let store = PgStore::new(pool, "processed_data").unwrap();
    store.ensure_schema().await.unwrap();

    let rows = vec![
        record("u1", "instagram", "user_1.json"),
        record("u1", "tiktok", "user_1.json"),
        record("u2", "tiktok", "user_12.json"),
    ];
    let report = BatchUploader::new(&store, 2)
        .upload(rows.clone())
        .await
        .into_result()
        .unwrap();
    assert_eq!(report.rows_inserted, 3);
    assert_eq!(report.batches_committed, 2);

    // Second upload of the same rows is a no-op
    let again = BatchUploader::new(&store, 2)
        .upload(rows)
        .await
        .into_result()
        .unwrap();
    assert_eq!(again.rows_inserted, 0);
    assert_eq!(again.rows_skipped, 3);

    let files = store.processed_source_files().await.unwrap();
    assert_eq!(files, vec!["user_1.json".to_string(), "user_12.json".to_string()]);

    let summary = store.summary().await.unwrap();
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.distinct_users, 2);
    assert_eq!(summary.platforms.get("tiktok"), Some(&2));

    Ok(())
}

#[sqlx::test(migrations = false)]
async fn test_constraint_violation_rolls_back_whole_batch(pool: PgPool) -> sqlx::Result<()> {
    let store = PgStore::new(pool.clone(), "processed_data").unwrap();
    store.ensure_schema().await.unwrap();

    let mut rows: Vec<NormalizedRecord> = (0..6)
        .map(|i| record(&format!("u{}", i), "instagram", &format!("user_{}.json", i)))
        .collect();
    // Bypasses the normalizer, so only the CHECK constraint can catch it
    rows[3].total_likes = -1;

    let outcome = BatchUploader::new(&store, 2).upload(rows).await;
    assert_eq!(outcome.report.batches_committed, 1);
    match outcome.error {
        Some(IngestError::Transaction {
            batch_index,
            start,
            end,
            source,
        }) => {
            assert_eq!((batch_index, start, end), (1, 2, 4));
            assert!(matches!(*source, IngestError::Constraint(_)));
        },
        other => panic!("expected transaction error, got {:?}", other),
    }

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_data")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 2, "only the first batch may be committed");

    Ok(())
}
