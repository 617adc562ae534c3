//! Authoritative merge of one stage's results
//!
//! The aggregator is the only writer of a parallel stage's mapping. It
//! replaces the whole mapping in a single read-modify-write and emits
//! `stage.completed` only after that write has succeeded.

use chrono::Utc;
use mtp_common::{EventBus, PipelineEvent, Stage};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::job_store::JobStateStore;
use crate::models::{AnalyzerResult, AnalyzerStatus, PipelinePhase};

#[derive(Debug, Error)]
pub enum FanInError {
    #[error("Stage {stage}: {names} analyzer names but {results} results")]
    LengthMismatch {
        stage: Stage,
        names: usize,
        results: usize,
    },

    #[error("Job {0} not found")]
    JobNotFound(String),

    /// Stray completion for a job that already reached a terminal state
    #[error("Job {0} is already terminal")]
    JobTerminal(String),

    #[error("Stage {stage} of job {job_id} was already finalized")]
    AlreadyFinalized { job_id: String, stage: Stage },

    #[error(transparent)]
    Store(#[from] mtp_common::Error),
}

/// Zips ordered names with ordered results and persists the mapping
pub struct StageFanInAggregator {
    store: Arc<dyn JobStateStore>,
    event_bus: EventBus,
}

impl StageFanInAggregator {
    pub fn new(store: Arc<dyn JobStateStore>, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    /// Persist a stage's full mapping, then announce it
    ///
    /// `results[i]` belongs to `names[i]`; the result's own name is
    /// overwritten with the requested one.
    pub async fn finalize(
        &self,
        job_id: &str,
        stage: Stage,
        names: &[String],
        results: Vec<AnalyzerResult>,
    ) -> Result<BTreeMap<String, AnalyzerResult>, FanInError> {
        if names.len() != results.len() {
            return Err(FanInError::LengthMismatch {
                stage,
                names: names.len(),
                results: results.len(),
            });
        }

        let mapping: BTreeMap<String, AnalyzerResult> = names
            .iter()
            .zip(results)
            .map(|(name, mut result)| {
                result.analyzer_name = name.clone();
                (name.clone(), result)
            })
            .collect();

        let completed = mapping
            .values()
            .filter(|r| r.status == AnalyzerStatus::Completed)
            .count();
        let failed = mapping.len() - completed;

        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| FanInError::JobNotFound(job_id.to_string()))?;

        if job.is_terminal() {
            tracing::warn!(job_id = %job_id, stage = %stage, "Discarding stage results for terminal job");
            return Err(FanInError::JobTerminal(job_id.to_string()));
        }
        if job.is_stage_completed(stage) {
            return Err(FanInError::AlreadyFinalized {
                job_id: job_id.to_string(),
                stage,
            });
        }

        job.apply_stage_mapping(stage, mapping.clone());
        job.transition_to(PipelinePhase::done(stage)).log();
        self.store.put(&job).await?;

        tracing::info!(
            job_id = %job_id,
            stage = %stage,
            completed,
            failed,
            "Stage results persisted"
        );

        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            job_id: job_id.to_string(),
            stage,
            completed,
            failed,
            timestamp: Utc::now(),
        });

        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDocument, JobOptions, JobStatus, StageSelections};
    use crate::services::job_store::InMemoryJobStore;
    use mtp_common::TokenUsage;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn seeded_store(stage_a: &[&str]) -> Arc<InMemoryJobStore> {
        let store = Arc::new(InMemoryJobStore::new());
        let mut job = JobDocument::new(
            "job-1".to_string(),
            StageSelections {
                stage_a: names(stage_a),
                stage_b: names(&["z"]),
                final_stage: Vec::new(),
            },
            JobOptions::default(),
            10,
        );
        job.transition_to(PipelinePhase::StageARunning);
        store.put(&job).await.unwrap();
        store
    }

    fn ok(name: &str, tokens: u64) -> AnalyzerResult {
        AnalyzerResult::completed(name, format!("{} out", name), TokenUsage::new(tokens, 0), "m".into())
    }

    #[tokio::test]
    async fn test_finalize_persists_then_emits() {
        let list = ["say_means", "perspective", "premises", "postulate"];
        let store = seeded_store(&list).await;
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let aggregator = StageFanInAggregator::new(store.clone(), bus);

        let results = vec![ok("say_means", 1), AnalyzerResult::failed("perspective", "fatal"), ok("premises", 2), ok("postulate", 3)];
        let mapping = aggregator
            .finalize("job-1", Stage::StageA, &names(&list), results)
            .await
            .unwrap();
        assert_eq!(mapping.len(), 4);

        // Event observed means the document is already persisted
        match rx.recv().await.unwrap() {
            PipelineEvent::StageCompleted { stage, completed, failed, .. } => {
                assert_eq!(stage, Stage::StageA);
                assert_eq!(completed, 3);
                assert_eq!(failed, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let job = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(job.phase, PipelinePhase::StageADone);
        assert!(job.is_stage_completed(Stage::StageA));
        assert!(job.stage_a.values().all(|r| r.is_terminal()));
        assert_eq!(job.stage_a["perspective"].status, AnalyzerStatus::Error);
        assert_eq!(job.token_usage_total.total, 6);
        assert_eq!(job.errors.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_names_are_authoritative_for_keys() {
        let store = seeded_store(&["x", "y"]).await;
        let aggregator = StageFanInAggregator::new(store.clone(), EventBus::new(4));

        // Placeholders may carry a different name; position decides
        let mapping = aggregator
            .finalize("job-1", Stage::StageA, &names(&["x", "y"]), vec![ok("?", 1), ok("??", 1)])
            .await
            .unwrap();
        assert_eq!(mapping["x"].analyzer_name, "x");
        assert_eq!(mapping["y"].analyzer_name, "y");
    }

    #[tokio::test]
    async fn test_length_mismatch_writes_nothing() {
        let store = seeded_store(&["x", "y"]).await;
        let writes = store.write_count();
        let aggregator = StageFanInAggregator::new(store.clone(), EventBus::new(4));

        let err = aggregator
            .finalize("job-1", Stage::StageA, &names(&["x", "y"]), vec![ok("x", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, FanInError::LengthMismatch { names: 2, results: 1, .. }));
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_terminal_job_is_immutable() {
        let store = seeded_store(&["x"]).await;
        let mut job = store.get("job-1").await.unwrap().unwrap();
        job.fail("cancelled");
        store.put(&job).await.unwrap();
        let before = store.get("job-1").await.unwrap().unwrap();

        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let aggregator = StageFanInAggregator::new(store.clone(), bus);
        let err = aggregator
            .finalize("job-1", Stage::StageA, &names(&["x"]), vec![ok("x", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, FanInError::JobTerminal(_)));
        assert_eq!(store.get("job-1").await.unwrap().unwrap(), before);
        assert_eq!(before.status, JobStatus::Error);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_finalize_rejected() {
        let store = seeded_store(&["x"]).await;
        let aggregator = StageFanInAggregator::new(store.clone(), EventBus::new(4));
        aggregator
            .finalize("job-1", Stage::StageA, &names(&["x"]), vec![ok("x", 1)])
            .await
            .unwrap();

        let err = aggregator
            .finalize("job-1", Stage::StageA, &names(&["x"]), vec![AnalyzerResult::failed("x", "late")])
            .await
            .unwrap_err();
        assert!(matches!(err, FanInError::AlreadyFinalized { .. }));
        assert!(store.get("job-1").await.unwrap().unwrap().stage_a["x"].is_completed());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let aggregator = StageFanInAggregator::new(store, EventBus::new(4));
        let err = aggregator
            .finalize("nope", Stage::StageB, &[], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FanInError::JobNotFound(_)));
    }
}
