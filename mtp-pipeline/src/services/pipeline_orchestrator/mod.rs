//! Pipeline orchestrator
//!
//! Drives one job through its state machine:
//!
//! QUEUED → STAGE_A_RUNNING → STAGE_A_DONE → STAGE_B_RUNNING → STAGE_B_DONE
//! → FINAL_RUNNING → COMPLETED, with ERROR reachable from any running phase.
//!
//! Each stage is handled by a dedicated `phase_*` method. Stages A and B run
//! their analyzers in parallel and hand the ordered results to the fan-in
//! aggregator; Final runs its analyzers one at a time and records each
//! result as it lands. Events are emitted after the write they describe.

use chrono::Utc;
use mtp_common::config::TomlConfig;
use mtp_common::{EventBus, PipelineEvent, Stage};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::analyzer_task::{AnalyzerTask, RetryPolicy};
use super::completion::CompletionClient;
use super::context_budget::ContextBudgetBuilder;
use super::fan_in::{FanInError, StageFanInAggregator};
use super::job_store::{ContextAuditStore, JobStateStore};
use super::parsers::ParserRegistry;
use super::progress::ProgressHints;
use super::stage_runner::{StageObserver, StageRunner};
use super::templates::{TemplateError, TemplateRegistry, TemplateRenderer};
use super::token_counter::TokenCounter;
use crate::models::{
    AnalyzerResult, AnalyzerSpec, AnalyzerStatus, JobDocument, JobOptions, PipelinePhase,
    PromptVariables, StageSelections, StageSpec,
};

mod context;
mod phase_final;
mod phase_stage_a;
mod phase_stage_b;

pub use context::{clip_transcript, summarize_transcript};
pub use phase_final::FINAL_SKIPPED_MESSAGE;

/// Error message written when a job is cancelled
pub const CANCELLED_MESSAGE: &str = "Job cancelled";

/// Submission payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub transcript: String,
    pub selections: StageSelections,
    #[serde(default)]
    pub options: JobOptions,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Rejected at submission; nothing was persisted
    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Job {0} is already terminal")]
    JobTerminal(String),

    #[error("Transcript for job {0} is missing")]
    MissingTranscript(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    FanIn(#[from] FanInError),

    #[error(transparent)]
    Store(#[from] mtp_common::Error),
}

/// Run-wide defaults; jobs may override concurrency, stop-on-error, model
/// and max tokens through their options
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_model: String,
    pub default_max_tokens: u32,
    pub max_concurrency: usize,
    pub stop_on_error: bool,
    pub retry: RetryPolicy,
    pub context_token_budget: i64,
    pub final_context_token_budget: i64,
    pub min_tokens_per_contributor: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            default_model: config.llm.default_model.clone(),
            default_max_tokens: config.llm.max_tokens,
            max_concurrency: pipeline.max_concurrency,
            stop_on_error: pipeline.stop_on_error,
            retry: RetryPolicy {
                max_attempts: pipeline.max_attempts,
                base_delay: Duration::from_millis(pipeline.retry_base_delay_ms),
                max_delay: Duration::from_millis(pipeline.retry_max_delay_ms),
                call_timeout: Duration::from_secs(config.llm.request_timeout_secs.max(1)),
            },
            context_token_budget: pipeline.context_token_budget,
            final_context_token_budget: pipeline.final_context_token_budget,
            min_tokens_per_contributor: pipeline.min_tokens_per_contributor,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// Pipeline orchestrator service
pub struct PipelineOrchestrator {
    store: Arc<dyn JobStateStore>,
    contexts: Arc<dyn ContextAuditStore>,
    event_bus: EventBus,
    completion: Arc<dyn CompletionClient>,
    templates: Arc<TemplateRegistry>,
    parsers: ParserRegistry,
    budget: ContextBudgetBuilder,
    fan_in: StageFanInAggregator,
    hints: ProgressHints,
    settings: PipelineSettings,
    /// Cancellation handles of jobs with a live run task
    running: RwLock<HashMap<String, CancellationToken>>,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn JobStateStore>,
        contexts: Arc<dyn ContextAuditStore>,
        event_bus: EventBus,
        completion: Arc<dyn CompletionClient>,
        templates: Arc<TemplateRegistry>,
        settings: PipelineSettings,
    ) -> Self {
        let fan_in = StageFanInAggregator::new(Arc::clone(&store), event_bus.clone());
        Self {
            store,
            contexts,
            event_bus,
            completion,
            templates,
            parsers: ParserRegistry::with_section_fallback(),
            budget: ContextBudgetBuilder::new(TokenCounter::default()),
            fan_in,
            hints: ProgressHints::new(),
            settings,
            running: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    /// Counter used for every budgeting decision of every job
    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.budget = ContextBudgetBuilder::new(counter);
        self
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn active_jobs(&self) -> usize {
        self.running.read().await.len()
    }

    /// Check a request against the template registry
    pub fn validate(&self, request: &JobRequest) -> Result<(), OrchestratorError> {
        if request.transcript.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "transcript must not be empty".to_string(),
            ));
        }
        if request.selections.total() == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "at least one analyzer must be selected".to_string(),
            ));
        }

        for stage in Stage::ALL {
            let names = request.selections.for_stage(stage);
            for (i, name) in names.iter().enumerate() {
                if names[..i].contains(name) {
                    return Err(OrchestratorError::InvalidRequest(format!(
                        "analyzer '{}' selected twice for {}",
                        name, stage
                    )));
                }
                if !self.templates.contains(stage, name) {
                    return Err(OrchestratorError::InvalidRequest(format!(
                        "unknown analyzer '{}' for {}",
                        name, stage
                    )));
                }
            }
        }
        Ok(())
    }

    /// Seed, persist and start a job; returns the seeded document
    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<JobDocument, OrchestratorError> {
        self.validate(&request)?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let job = JobDocument::new(
            job_id.clone(),
            request.selections,
            request.options,
            request.transcript.chars().count(),
        );

        self.store.put(&job).await?;
        self.store.save_transcript(&job_id, &request.transcript).await?;

        tracing::info!(
            job_id = %job_id,
            stage_a = job.selections.stage_a.len(),
            stage_b = job.selections.stage_b.len(),
            final_stage = job.selections.final_stage.len(),
            transcript_chars = job.transcript_chars,
            "Job queued"
        );

        self.event_bus.emit_lossy(PipelineEvent::JobQueued {
            job_id: job_id.clone(),
            analyzer_count: job.selections.total(),
            timestamp: Utc::now(),
        });

        let cancel = CancellationToken::new();
        self.running
            .write()
            .await
            .insert(job_id.clone(), cancel.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_job(&job_id, cancel).await;
            this.running.write().await.remove(&job_id);
        });

        Ok(job)
    }

    /// Job document as clients see it: persisted state plus processing hints
    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobDocument>, OrchestratorError> {
        let Some(mut job) = self.store.get(job_id).await? else {
            return Ok(None);
        };
        self.hints.overlay(&mut job).await;
        Ok(Some(job))
    }

    /// Stop scheduling further stages and task starts
    ///
    /// Analyzer calls already in flight run to completion; the job then
    /// ends in the error state.
    pub async fn cancel(&self, job_id: &str) -> Result<JobDocument, OrchestratorError> {
        // Token first: a run task writes its terminal state before releasing it
        let token = self.running.read().await.get(job_id).cloned();
        let job = self.load_job(job_id).await?;
        if job.is_terminal() {
            return Err(OrchestratorError::JobTerminal(job_id.to_string()));
        }

        tracing::info!(job_id = %job_id, "Cancellation requested");
        match token {
            Some(token) => {
                self.emit_cancelled(job_id);
                token.cancel();
                Ok(job)
            }
            None => {
                // No run task owns this job; finish it here
                let Some(failed) = self.persist_failure(job_id, CANCELLED_MESSAGE).await? else {
                    return Err(OrchestratorError::JobTerminal(job_id.to_string()));
                };
                self.emit_cancelled(job_id);
                self.emit_job_error(job_id, CANCELLED_MESSAGE);
                Ok(failed)
            }
        }
    }

    fn emit_cancelled(&self, job_id: &str) {
        self.event_bus.emit_lossy(PipelineEvent::JobCancelled {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Run a persisted job to a terminal state
    pub async fn run_job(&self, job_id: &str, cancel: CancellationToken) {
        match self.execute(job_id, &cancel).await {
            Ok(()) => {}
            Err(OrchestratorError::JobTerminal(_)) => {
                tracing::info!(job_id = %job_id, "Job became terminal outside its run task");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Pipeline failed");
                self.fail_job(job_id, &e.to_string()).await;
            }
        }
        self.hints.clear_job(job_id).await;
    }

    async fn execute(&self, job_id: &str, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        let transcript = self
            .store
            .load_transcript(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::MissingTranscript(job_id.to_string()))?;

        let job = self
            .update_job(job_id, |job| {
                job.transition_to(PipelinePhase::StageARunning).log();
            })
            .await?;

        tracing::info!(job_id = %job_id, "Starting pipeline");
        self.event_bus.emit_lossy(PipelineEvent::JobStarted {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        });

        self.phase_stage_a(&job, &transcript, cancel).await?;
        Self::check_cancelled(cancel)?;

        self.phase_stage_b(job_id, &transcript, cancel).await?;
        Self::check_cancelled(cancel)?;

        self.phase_final(job_id, &transcript, cancel).await?;
        Self::check_cancelled(cancel)?;

        let job = self
            .update_job(job_id, |job| {
                job.transition_to(PipelinePhase::Completed).log();
            })
            .await?;

        tracing::info!(
            job_id = %job_id,
            total_tokens = job.token_usage_total.total,
            errors = job.errors.len(),
            "Pipeline completed"
        );

        self.event_bus.emit_lossy(PipelineEvent::JobCompleted {
            job_id: job_id.to_string(),
            total_token_usage: job.token_usage_total,
            total_processing_time_seconds: job.total_processing_time_seconds.unwrap_or_default(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn check_cancelled(cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        if cancel.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(super) async fn load_job(&self, job_id: &str) -> Result<JobDocument, OrchestratorError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Read-modify-write of a non-terminal job
    pub(super) async fn update_job<F>(&self, job_id: &str, mutate: F) -> Result<JobDocument, OrchestratorError>
    where
        F: FnOnce(&mut JobDocument),
    {
        let mut job = self.load_job(job_id).await?;
        if job.is_terminal() {
            return Err(OrchestratorError::JobTerminal(job_id.to_string()));
        }
        mutate(&mut job);
        self.store.put(&job).await?;
        Ok(job)
    }

    /// Terminal error transition; never fails the caller
    async fn fail_job(&self, job_id: &str, message: &str) {
        match self.persist_failure(job_id, message).await {
            Ok(Some(_)) => self.emit_job_error(job_id, message),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist job error state");
            }
        }
    }

    /// Write the error state; `None` when the job was already terminal
    async fn persist_failure(&self, job_id: &str, message: &str) -> Result<Option<JobDocument>, OrchestratorError> {
        let mut job = self.load_job(job_id).await?;
        if job.is_terminal() {
            return Ok(None);
        }

        job.fail(message).log();
        self.store.put(&job).await?;
        Ok(Some(job))
    }

    fn emit_job_error(&self, job_id: &str, message: &str) {
        self.event_bus.emit_lossy(PipelineEvent::JobError {
            job_id: job_id.to_string(),
            error: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Mark an unselected stage as done without running anything
    pub(super) async fn skip_empty_stage(&self, job_id: &str, stage: Stage) -> Result<(), OrchestratorError> {
        tracing::debug!(job_id = %job_id, stage = %stage, "No analyzers selected, skipping stage");
        self.update_job(job_id, |job| {
            job.transition_to(PipelinePhase::running(stage)).log();
            job.mark_stage_completed(stage);
            if stage != Stage::Final {
                job.transition_to(PipelinePhase::done(stage)).log();
            }
        })
        .await?;
        Ok(())
    }

    pub(super) fn build_task(&self, job: &JobDocument, stage: Stage, spec: &AnalyzerSpec) -> AnalyzerTask {
        let options = job.options.for_stage(stage);
        let renderer: Arc<dyn TemplateRenderer> = self.templates.clone();

        AnalyzerTask::new(
            stage,
            spec.clone(),
            options
                .model
                .clone()
                .unwrap_or_else(|| self.settings.default_model.clone()),
            options.max_tokens.unwrap_or(self.settings.default_max_tokens),
            Arc::clone(&self.completion),
            renderer,
        )
        .with_parser(self.parsers.for_analyzer(&spec.name))
        .with_retry(self.settings.retry.clone())
    }

    pub(super) fn observer(&self, job_id: &str, stage: Stage) -> Arc<StageEvents> {
        Arc::new(StageEvents {
            job_id: job_id.to_string(),
            stage,
            event_bus: self.event_bus.clone(),
            hints: self.hints.clone(),
        })
    }

    fn stop_on_error_for(&self, job: &JobDocument) -> bool {
        job.options.stop_on_error.unwrap_or(self.settings.stop_on_error)
    }

    /// Run a parallel stage's analyzers; one result per analyzer, in order
    pub(super) async fn run_parallel_stage(
        &self,
        job: &JobDocument,
        spec: &StageSpec,
        variables: PromptVariables,
        cancel: &CancellationToken,
    ) -> Vec<AnalyzerResult> {
        let concurrency = job
            .options
            .max_concurrency
            .unwrap_or(self.settings.max_concurrency);
        let runner = StageRunner::new(concurrency)
            .with_stop_on_error(self.stop_on_error_for(job))
            .with_cancellation(cancel.clone())
            .with_observer(self.observer(&job.job_id, spec.stage));

        let variables = Arc::new(variables);
        runner
            .run_stage(&spec.names(), |index, _name| {
                let task = self.build_task(job, spec.stage, &spec.analyzers[index]);
                let variables = Arc::clone(&variables);
                async move { task.run(&variables).await }
            })
            .await
    }
}

/// Turns runner hooks into processing hints and analyzer events
pub(super) struct StageEvents {
    job_id: String,
    stage: Stage,
    event_bus: EventBus,
    hints: ProgressHints,
}

#[async_trait::async_trait]
impl StageObserver for StageEvents {
    async fn task_started(&self, analyzer: &str) {
        self.hints
            .mark_processing(&self.job_id, self.stage, analyzer)
            .await;
        self.event_bus.emit_lossy(PipelineEvent::AnalyzerStarted {
            job_id: self.job_id.clone(),
            stage: self.stage,
            analyzer: analyzer.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn task_finished(&self, result: &AnalyzerResult) {
        self.hints
            .clear(&self.job_id, self.stage, &result.analyzer_name)
            .await;

        let event = match result.status {
            AnalyzerStatus::Completed => PipelineEvent::AnalyzerCompleted {
                job_id: self.job_id.clone(),
                stage: self.stage,
                analyzer: result.analyzer_name.clone(),
                token_usage: result.token_usage,
                processing_time_seconds: result.processing_time_seconds,
                timestamp: Utc::now(),
            },
            AnalyzerStatus::Error => PipelineEvent::AnalyzerError {
                job_id: self.job_id.clone(),
                stage: self.stage,
                analyzer: result.analyzer_name.clone(),
                error_message: result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
                timestamp: Utc::now(),
            },
            AnalyzerStatus::Pending | AnalyzerStatus::Processing => return,
        };
        self.event_bus.emit_lossy(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::completion::{Completion, CompletionError, CompletionRequest};
    use crate::services::job_store::InMemoryJobStore;
    use crate::models::JobSummary;
    use async_trait::async_trait;
    use mtp_common::TokenUsage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
            Ok(Completion {
                text: format!("echo {}", request.prompt.len()),
                usage: TokenUsage::new(2, 1),
                latency: Duration::from_millis(1),
                model: request.model,
            })
        }
    }

    fn orchestrator() -> Arc<PipelineOrchestrator> {
        let store = Arc::new(InMemoryJobStore::new());
        Arc::new(PipelineOrchestrator::new(
            store.clone(),
            store,
            EventBus::new(64),
            Arc::new(EchoClient),
            Arc::new(TemplateRegistry::with_builtin_defaults()),
            PipelineSettings::default(),
        ))
    }

    fn request(stage_a: &[&str]) -> JobRequest {
        JobRequest {
            transcript: "Alice: ship it\nBob: not yet".to_string(),
            selections: StageSelections {
                stage_a: stage_a.iter().map(|s| s.to_string()).collect(),
                ..StageSelections::default()
            },
            options: JobOptions::default(),
        }
    }

    fn rejection(result: Result<(), OrchestratorError>) -> String {
        match result {
            Err(OrchestratorError::InvalidRequest(msg)) => msg,
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let orch = orchestrator();
        assert!(orch.validate(&request(&["premises", "say_means"])).is_ok());

        assert!(rejection(orch.validate(&request(&["nonexistent"]))).contains("unknown analyzer"));
        assert!(rejection(orch.validate(&request(&["premises", "premises"]))).contains("twice"));
        assert!(rejection(orch.validate(&request(&[]))).contains("at least one"));

        let mut blank = request(&["premises"]);
        blank.transcript = "   ".to_string();
        assert!(rejection(orch.validate(&blank)).contains("transcript"));

        // Stage B analyzers are not Stage A analyzers
        let mut wrong_stage = request(&[]);
        wrong_stage.selections.stage_b = vec!["premises".to_string()];
        assert!(rejection(orch.validate(&wrong_stage)).contains("unknown analyzer"));
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = TomlConfig::default();
        config.pipeline.max_concurrency = 7;
        config.pipeline.retry_base_delay_ms = 250;
        config.llm.default_model = "local-model".to_string();

        let settings = PipelineSettings::from_config(&config);
        assert_eq!(settings.max_concurrency, 7);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        assert_eq!(settings.default_model, "local-model");
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_rejected() {
        let orch = orchestrator();
        let mut job = JobDocument::new(
            "done".to_string(),
            request(&["premises"]).selections,
            JobOptions::default(),
            3,
        );
        job.transition_to(PipelinePhase::StageARunning);
        job.transition_to(PipelinePhase::Completed);
        orch.store.put(&job).await.unwrap();

        assert!(matches!(
            orch.cancel("done").await,
            Err(OrchestratorError::JobTerminal(_))
        ));
        assert!(matches!(
            orch.cancel("missing").await,
            Err(OrchestratorError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_without_run_task_fails_job() {
        let orch = orchestrator();
        let job = JobDocument::new(
            "orphan".to_string(),
            request(&["premises"]).selections,
            JobOptions::default(),
            3,
        );
        orch.store.put(&job).await.unwrap();

        let cancelled = orch.cancel("orphan").await.unwrap();
        assert!(cancelled.is_terminal());
        assert_eq!(cancelled.stage_a["premises"].status, AnalyzerStatus::Error);
        assert_eq!(cancelled.errors.last().unwrap().message, CANCELLED_MESSAGE);
    }

    /// Shows the job completed from the second read on, like a run task
    /// finishing while a cancel is in progress
    #[derive(Default)]
    struct FinishesAfterFirstRead {
        inner: InMemoryJobStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl JobStateStore for FinishesAfterFirstRead {
        async fn get(&self, job_id: &str) -> mtp_common::Result<Option<JobDocument>> {
            let job = self.inner.get(job_id).await?;
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(job);
            }
            Ok(job.map(|mut job| {
                job.transition_to(PipelinePhase::StageARunning);
                job.transition_to(PipelinePhase::Completed);
                job
            }))
        }

        async fn put(&self, job: &JobDocument) -> mtp_common::Result<()> {
            self.inner.put(job).await
        }

        async fn list_recent(&self, limit: usize) -> mtp_common::Result<Vec<JobSummary>> {
            self.inner.list_recent(limit).await
        }

        async fn save_transcript(&self, job_id: &str, transcript: &str) -> mtp_common::Result<()> {
            self.inner.save_transcript(job_id, transcript).await
        }

        async fn load_transcript(&self, job_id: &str) -> mtp_common::Result<Option<String>> {
            self.inner.load_transcript(job_id).await
        }
    }

    #[tokio::test]
    async fn test_cancel_racing_completion_is_rejected_silently() {
        let store = Arc::new(FinishesAfterFirstRead::default());
        let contexts = Arc::new(InMemoryJobStore::new());
        let orch = PipelineOrchestrator::new(
            store.clone(),
            contexts,
            EventBus::new(16),
            Arc::new(EchoClient),
            Arc::new(TemplateRegistry::with_builtin_defaults()),
            PipelineSettings::default(),
        );
        let job = JobDocument::new(
            "racing".to_string(),
            request(&["premises"]).selections,
            JobOptions::default(),
            3,
        );
        store.inner.put(&job).await.unwrap();
        let mut rx = orch.event_bus.subscribe();

        assert!(matches!(
            orch.cancel("racing").await,
            Err(OrchestratorError::JobTerminal(_))
        ));
        assert!(rx.try_recv().is_err());
        // The completed document was never overwritten with the error state
        let stored = store.inner.get("racing").await.unwrap().unwrap();
        assert_eq!(stored.status, crate::models::JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_missing_transcript_fails_job() {
        let orch = orchestrator();
        let job = JobDocument::new(
            "no-transcript".to_string(),
            request(&["premises"]).selections,
            JobOptions::default(),
            3,
        );
        orch.store.put(&job).await.unwrap();

        orch.run_job("no-transcript", CancellationToken::new()).await;

        let failed = orch.store.get("no-transcript").await.unwrap().unwrap();
        assert!(failed.is_terminal());
        assert!(failed.stage_a.values().all(|r| r.is_terminal()));
    }
}
