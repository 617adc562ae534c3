//! SQLite persistence for job documents and context audit records

pub mod contexts;
pub mod jobs;

pub use contexts::SqliteContextStore;
pub use jobs::{cleanup_stale_jobs, SqliteJobStore};

use mtp_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Default bound on lock retries for document writes
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Initialize database connection pool
///
/// Creates the file (and parent directory) on first run.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        tracing::info!("Initialized new database: {}", db_path.display());
    } else {
        tracing::info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets status readers proceed while a fan-in write is in flight
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the jobs and combined_contexts tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            document TEXT NOT NULL,
            transcript TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS combined_contexts (
            job_id TEXT NOT NULL,
            transition TEXT NOT NULL,
            text TEXT NOT NULL,
            allocations TEXT NOT NULL DEFAULT '{}',
            token_budget INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (job_id, transition)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (jobs, combined_contexts)");

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // One connection: every connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_database_pool_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/mtp.db");

        let pool = init_database_pool(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["combined_contexts".to_string(), "jobs".to_string()]);

        // Idempotent
        init_tables(&pool).await.unwrap();
    }
}
