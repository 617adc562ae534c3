//! In-flight analyzer hints
//!
//! "Processing" is a display hint, not job state. It lives here, outside the
//! persisted document, so a stage's fan-in write can never race with it.
//! Status responses overlay the hints onto `pending` entries.

use chrono::{DateTime, Utc};
use mtp_common::Stage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{AnalyzerStatus, JobDocument};

type JobHints = HashMap<(Stage, String), DateTime<Utc>>;

/// Shared board of analyzers currently running, keyed by job
#[derive(Clone, Default)]
pub struct ProgressHints {
    inner: Arc<RwLock<HashMap<String, JobHints>>>,
}

impl ProgressHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_processing(&self, job_id: &str, stage: Stage, analyzer: &str) {
        let mut hints = self.inner.write().await;
        hints
            .entry(job_id.to_string())
            .or_default()
            .insert((stage, analyzer.to_string()), Utc::now());
    }

    pub async fn clear(&self, job_id: &str, stage: Stage, analyzer: &str) {
        let mut hints = self.inner.write().await;
        if let Some(job) = hints.get_mut(job_id) {
            job.remove(&(stage, analyzer.to_string()));
            if job.is_empty() {
                hints.remove(job_id);
            }
        }
    }

    /// Drop every hint of a job (terminal transition)
    pub async fn clear_job(&self, job_id: &str) {
        self.inner.write().await.remove(job_id);
    }

    /// Show `processing` for pending entries with a live hint
    ///
    /// Terminal entries always win over a stale hint.
    pub async fn overlay(&self, job: &mut JobDocument) {
        if job.is_terminal() {
            return;
        }
        let hints = self.inner.read().await;
        let Some(active) = hints.get(&job.job_id) else {
            return;
        };

        for ((stage, analyzer), _) in active.iter() {
            let entry = match stage {
                Stage::StageA => job.stage_a.get_mut(analyzer),
                Stage::StageB => job.stage_b.get_mut(analyzer),
                Stage::Final => job.final_stage.get_mut(analyzer),
            };
            if let Some(result) = entry {
                if result.status == AnalyzerStatus::Pending {
                    result.status = AnalyzerStatus::Processing;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalyzerResult, JobOptions, PipelinePhase, StageSelections};

    fn job() -> JobDocument {
        let mut job = JobDocument::new(
            "job-1".to_string(),
            StageSelections {
                stage_a: vec!["x".to_string(), "y".to_string()],
                ..StageSelections::default()
            },
            JobOptions::default(),
            10,
        );
        job.transition_to(PipelinePhase::StageARunning);
        job
    }

    #[tokio::test]
    async fn test_overlay_marks_only_pending_entries() {
        let hints = ProgressHints::new();
        hints.mark_processing("job-1", Stage::StageA, "x").await;
        hints.mark_processing("job-1", Stage::StageA, "y").await;

        let mut doc = job();
        doc.record_result(Stage::StageA, AnalyzerResult::failed("y", "fatal"));
        hints.overlay(&mut doc).await;

        assert_eq!(doc.stage_a["x"].status, AnalyzerStatus::Processing);
        assert_eq!(doc.stage_a["y"].status, AnalyzerStatus::Error);
    }

    #[tokio::test]
    async fn test_clear_removes_hint() {
        let hints = ProgressHints::new();
        hints.mark_processing("job-1", Stage::StageA, "x").await;
        let mut doc = job();
        hints.overlay(&mut doc).await;
        assert_eq!(doc.stage_a["x"].status, AnalyzerStatus::Processing);

        hints.clear("job-1", Stage::StageA, "x").await;
        let mut doc = job();
        hints.overlay(&mut doc).await;
        assert_eq!(doc.stage_a["x"].status, AnalyzerStatus::Pending);
    }

    #[tokio::test]
    async fn test_terminal_job_ignores_hints() {
        let hints = ProgressHints::new();
        hints.mark_processing("job-1", Stage::StageA, "x").await;

        let mut doc = job();
        doc.fail("cancelled");
        hints.overlay(&mut doc).await;
        assert_eq!(doc.stage_a["x"].status, AnalyzerStatus::Error);

        hints.clear_job("job-1").await;
        let mut live = job();
        hints.overlay(&mut live).await;
        assert_eq!(live.stage_a["x"].status, AnalyzerStatus::Pending);
    }
}
