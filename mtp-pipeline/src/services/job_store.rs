//! Job document persistence seams
//!
//! Stores are passive: whole-document `get`/`put` by job id, no business
//! logic. The orchestrator is the only writer of a running job, so no
//! locking is layered on top.

use async_trait::async_trait;
use mtp_common::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::models::{ContextSnapshot, ContextTransition, JobDocument, JobSummary};

/// Durable key-value store for job documents
#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<JobDocument>>;

    /// Whole-document replace (insert on first write)
    async fn put(&self, job: &JobDocument) -> Result<()>;

    /// Most recently created jobs first
    async fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>>;

    async fn save_transcript(&self, job_id: &str, transcript: &str) -> Result<()>;

    async fn load_transcript(&self, job_id: &str) -> Result<Option<String>>;
}

/// Audit trail of combined contexts, keyed by job id and transition
#[async_trait]
pub trait ContextAuditStore: Send + Sync {
    async fn record(&self, snapshot: &ContextSnapshot) -> Result<()>;

    async fn fetch(
        &self,
        job_id: &str,
        transition: ContextTransition,
    ) -> Result<Option<ContextSnapshot>>;

    async fn list(&self, job_id: &str) -> Result<Vec<ContextSnapshot>>;
}

/// Process-local store for tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobDocument>>,
    transcripts: RwLock<HashMap<String, String>>,
    contexts: RwLock<HashMap<(String, ContextTransition), ContextSnapshot>>,
    writes: AtomicUsize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStateStore for InMemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<JobDocument>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn put(&self, job: &JobDocument) -> Result<()> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<JobSummary> = jobs.values().map(JobDocument::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn save_transcript(&self, job_id: &str, transcript: &str) -> Result<()> {
        self.transcripts
            .write()
            .await
            .insert(job_id.to_string(), transcript.to_string());
        Ok(())
    }

    async fn load_transcript(&self, job_id: &str) -> Result<Option<String>> {
        Ok(self.transcripts.read().await.get(job_id).cloned())
    }
}

#[async_trait]
impl ContextAuditStore for InMemoryJobStore {
    async fn record(&self, snapshot: &ContextSnapshot) -> Result<()> {
        self.contexts.write().await.insert(
            (snapshot.job_id.clone(), snapshot.transition),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn fetch(
        &self,
        job_id: &str,
        transition: ContextTransition,
    ) -> Result<Option<ContextSnapshot>> {
        Ok(self
            .contexts
            .read()
            .await
            .get(&(job_id.to_string(), transition))
            .cloned())
    }

    async fn list(&self, job_id: &str) -> Result<Vec<ContextSnapshot>> {
        let contexts = self.contexts.read().await;
        let mut snapshots: Vec<ContextSnapshot> = contexts
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        Ok(snapshots)
    }
}
