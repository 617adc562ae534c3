//! Job document persistence
//!
//! The whole document is stored as JSON; `status` and `created_at` are
//! duplicated into columns for listing and startup cleanup.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use mtp_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::models::{JobDocument, JobSummary};
use crate::services::job_store::JobStateStore;
use crate::utils::retry_on_lock;

/// Message recorded on jobs a previous process left running
pub const RESTART_INTERRUPTION: &str = "Interrupted by service restart";

/// [`JobStateStore`] backed by the `jobs` table
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn timestamp(dt: chrono::DateTime<Utc>) -> String {
    // Fixed precision so lexical order matches time order
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode(document: &str) -> Result<JobDocument> {
    serde_json::from_str(document)
        .map_err(|e| Error::Internal(format!("Failed to deserialize job document: {}", e)))
}

#[async_trait]
impl JobStateStore for SqliteJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<JobDocument>> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT document FROM jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        document.as_deref().map(decode).transpose()
    }

    async fn put(&self, job: &JobDocument) -> Result<()> {
        // Serialize before touching the database
        let document = serde_json::to_string(job)
            .map_err(|e| Error::Internal(format!("Failed to serialize job document: {}", e)))?;
        let status = job.status.as_str();
        let created_at = timestamp(job.created_at);
        let updated_at = timestamp(Utc::now());

        retry_on_lock("put_job", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO jobs (job_id, status, document, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(job_id) DO UPDATE SET
                    status = excluded.status,
                    document = excluded.document,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&job.job_id)
            .bind(status)
            .bind(&document)
            .bind(&created_at)
            .bind(&updated_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            Ok(())
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let rows = sqlx::query("SELECT document FROM jobs ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let document: String = row.get("document");
                decode(&document).map(|job| job.summary())
            })
            .collect()
    }

    async fn save_transcript(&self, job_id: &str, transcript: &str) -> Result<()> {
        let result = retry_on_lock("save_transcript", self.max_lock_wait_ms, || async {
            sqlx::query("UPDATE jobs SET transcript = ? WHERE job_id = ?")
                .bind(transcript)
                .bind(job_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Job {}", job_id)));
        }
        Ok(())
    }

    async fn load_transcript(&self, job_id: &str) -> Result<Option<String>> {
        let transcript: Option<Option<String>> =
            sqlx::query_scalar("SELECT transcript FROM jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(transcript.flatten())
    }
}

/// Cleanup stale jobs on startup
///
/// Any job not in a terminal state when the service starts belongs to a
/// previous process and will never progress. Mark it as `error` so no
/// analyzer stays pending forever.
pub async fn cleanup_stale_jobs(store: &SqliteJobStore) -> Result<usize> {
    let rows = sqlx::query("SELECT document FROM jobs WHERE status IN ('queued', 'running')")
        .fetch_all(store.pool())
        .await?;

    let mut cleaned = 0;
    for row in rows {
        let document: String = row.get("document");
        let mut job = decode(&document)?;
        job.fail(RESTART_INTERRUPTION).log();
        store.put(&job).await?;
        tracing::warn!(job_id = %job.job_id, "Marked stale job as error");
        cleaned += 1;
    }

    Ok(cleaned)
}
