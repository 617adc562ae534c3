//! Pipeline runs persisted to an on-disk SQLite database

mod helpers;

use helpers::{fast_settings, test_templates, wait_for_terminal, ScriptedClient};
use mtp_common::events::EventBus;
use mtp_pipeline::db::{self, SqliteContextStore, SqliteJobStore};
use mtp_pipeline::models::{
    AnalyzerStatus, ContextTransition, JobDocument, JobOptions, JobStatus, PipelinePhase,
    StageSelections,
};
use mtp_pipeline::services::{
    ContextAuditStore, JobRequest, JobStateStore, PipelineOrchestrator,
};
use std::sync::Arc;
use tempfile::TempDir;

fn selections(stage_a: &[&str], stage_b: &[&str]) -> StageSelections {
    StageSelections {
        stage_a: stage_a.iter().map(|s| s.to_string()).collect(),
        stage_b: stage_b.iter().map(|s| s.to_string()).collect(),
        final_stage: Vec::new(),
    }
}

#[tokio::test]
async fn test_job_survives_reopening_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("mtp.db");

    let job_id = {
        let pool = db::init_database_pool(&db_path).await.unwrap();
        let store = Arc::new(SqliteJobStore::new(pool.clone()));
        let contexts = Arc::new(SqliteContextStore::new(pool));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            store.clone(),
            contexts.clone(),
            EventBus::new(64),
            Arc::new(ScriptedClient::new()),
            Arc::new(test_templates()),
            fast_settings(),
        ));

        let job = orchestrator
            .submit(JobRequest {
                transcript: "JOB-DISK persisted meeting".to_string(),
                selections: selections(&["x", "y"], &["z"]),
                options: JobOptions::default(),
            })
            .await
            .unwrap();
        let done = wait_for_terminal(store.as_ref(), &job.job_id).await;
        assert_eq!(done.status, JobStatus::Completed);
        job.job_id
    };

    let pool = db::init_database_pool(&db_path).await.unwrap();
    let store = SqliteJobStore::new(pool.clone());
    let contexts = SqliteContextStore::new(pool);

    let reread = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(reread.status, JobStatus::Completed);
    assert_eq!(reread.stage_b["z"].status, AnalyzerStatus::Completed);
    assert_eq!(
        store.load_transcript(&job_id).await.unwrap().as_deref(),
        Some("JOB-DISK persisted meeting")
    );

    let snapshot = contexts
        .fetch(&job_id, ContextTransition::StageAToStageB)
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.text.contains("[x]"));
    assert!(snapshot.text.contains("[y]"));

    // Completed jobs are not touched by restart cleanup
    assert_eq!(db::cleanup_stale_jobs(&store).await.unwrap(), 0);
}

#[tokio::test]
async fn test_restart_cleanup_fails_interrupted_jobs() {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database_pool(&dir.path().join("mtp.db")).await.unwrap();
    let store = SqliteJobStore::new(pool);

    let mut running = JobDocument::new(
        "interrupted".to_string(),
        selections(&["x"], &["z"]),
        JobOptions::default(),
        10,
    );
    running.transition_to(PipelinePhase::StageARunning);
    store.put(&running).await.unwrap();

    let queued = JobDocument::new(
        "never-started".to_string(),
        selections(&["x"], &[]),
        JobOptions::default(),
        10,
    );
    store.put(&queued).await.unwrap();

    assert_eq!(db::cleanup_stale_jobs(&store).await.unwrap(), 2);

    for job_id in ["interrupted", "never-started"] {
        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job
            .stage_a
            .values()
            .chain(job.stage_b.values())
            .all(|r| r.status == AnalyzerStatus::Error));
    }
    assert_eq!(db::cleanup_stale_jobs(&store).await.unwrap(), 0);
}
