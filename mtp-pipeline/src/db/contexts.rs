//! Combined-context audit records

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mtp_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use super::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::models::{ContextSnapshot, ContextTransition};
use crate::services::job_store::ContextAuditStore;
use crate::utils::retry_on_lock;

/// [`ContextAuditStore`] backed by the `combined_contexts` table
#[derive(Clone)]
pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<ContextSnapshot> {
    let transition: String = row.get("transition");
    let allocations: String = row.get("allocations");
    let allocations: BTreeMap<String, usize> = serde_json::from_str(&allocations)
        .map_err(|e| Error::Internal(format!("Failed to deserialize allocations: {}", e)))?;
    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(ContextSnapshot {
        job_id: row.get("job_id"),
        transition: transition.parse()?,
        text: row.get("text"),
        allocations,
        token_budget: row.get("token_budget"),
        token_count: row.get::<i64, _>("token_count") as usize,
        created_at,
    })
}

#[async_trait]
impl ContextAuditStore for SqliteContextStore {
    async fn record(&self, snapshot: &ContextSnapshot) -> Result<()> {
        let allocations = serde_json::to_string(&snapshot.allocations)?;
        let created_at = snapshot
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        retry_on_lock("record_context", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO combined_contexts (
                    job_id, transition, text, allocations, token_budget, token_count, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(job_id, transition) DO UPDATE SET
                    text = excluded.text,
                    allocations = excluded.allocations,
                    token_budget = excluded.token_budget,
                    token_count = excluded.token_count,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&snapshot.job_id)
            .bind(snapshot.transition.as_str())
            .bind(&snapshot.text)
            .bind(&allocations)
            .bind(snapshot.token_budget)
            .bind(snapshot.token_count as i64)
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            Ok(())
        })
        .await
    }

    async fn fetch(
        &self,
        job_id: &str,
        transition: ContextTransition,
    ) -> Result<Option<ContextSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, transition, text, allocations, token_budget, token_count, created_at
            FROM combined_contexts
            WHERE job_id = ? AND transition = ?
            "#,
        )
        .bind(job_id)
        .bind(transition.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn list(&self, job_id: &str) -> Result<Vec<ContextSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, transition, text, allocations, token_budget, token_count, created_at
            FROM combined_contexts
            WHERE job_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }
}
