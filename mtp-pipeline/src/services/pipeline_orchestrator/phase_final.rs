//! Final stage: analyzers over the combined A+B context, run one at a time
//!
//! Each result is persisted as it lands, then announced. There is no fan-in
//! here: the sequential loop is the only writer of the Final mapping.

use chrono::Utc;
use mtp_common::{PipelineEvent, Stage};
use tokio_util::sync::CancellationToken;

use super::context::{qualify, transcript_for};
use super::{OrchestratorError, PipelineOrchestrator};
use crate::models::{
    AnalyzerResult, AnalyzerStatus, ContextTransition, PipelinePhase, PromptVariables,
};
use crate::services::stage_runner::StageObserver;

/// Error recorded on Final analyzers when nothing upstream is usable
pub const FINAL_SKIPPED_MESSAGE: &str = "Skipped: no usable upstream context";

impl PipelineOrchestrator {
    /// Final - context from Stage A and Stage B outputs, transcript optional
    pub(super) async fn phase_final(
        &self,
        job_id: &str,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let stage = Stage::Final;
        let job = self.load_job(job_id).await?;
        let names = job.selections.final_stage.clone();
        if names.is_empty() {
            return self.skip_empty_stage(job_id, stage).await;
        }

        let options = job.options.for_stage(stage).clone();
        let mut contributions = qualify(Stage::StageA, job.completed_outputs(Stage::StageA));
        contributions.extend(qualify(Stage::StageB, job.completed_outputs(Stage::StageB)));

        if contributions.is_empty() && !options.include_transcript {
            return self.skip_final(job_id).await;
        }

        let spec = self.templates.stage_spec(stage, &names)?;
        let context = self
            .compose_context(
                job_id,
                ContextTransition::StagesAbToFinal,
                &contributions,
                self.settings.final_context_token_budget,
            )
            .await?;

        let job = self
            .update_job(job_id, |job| {
                job.transition_to(PipelinePhase::running(stage)).log();
            })
            .await?;

        let mut variables = PromptVariables::context(context.text);
        if let Some(text) = transcript_for(&options, transcript) {
            variables = variables.with_transcript(text);
        }

        tracing::info!(
            job_id = %job_id,
            analyzers = names.len(),
            contributors = contributions.len(),
            "Final: running report analyzers sequentially"
        );

        let observer = self.observer(job_id, stage);
        let stop_on_error = self.stop_on_error_for(&job);
        let mut halted = false;

        for analyzer in &spec.analyzers {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let result = if halted {
                AnalyzerResult::failed(
                    analyzer.name.clone(),
                    "Not started: an earlier analyzer in this stage failed",
                )
            } else {
                observer.task_started(&analyzer.name).await;
                self.build_task(&job, stage, analyzer).run(&variables).await
            };
            if stop_on_error && result.status == AnalyzerStatus::Error {
                halted = true;
            }

            let recorded = result.clone();
            self.update_job(job_id, move |job| {
                if !job.record_result(stage, recorded) {
                    tracing::warn!(job_id = %job.job_id, "Final result for an already-terminal entry discarded");
                }
            })
            .await?;
            observer.task_finished(&result).await;
        }

        let job = self
            .update_job(job_id, |job| job.mark_stage_completed(stage))
            .await?;
        self.emit_final_completed(&job);

        Ok(())
    }

    async fn skip_final(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let stage = Stage::Final;
        tracing::warn!(job_id = %job_id, "Final: no usable upstream context, skipping stage");

        let job = self
            .update_job(job_id, |job| {
                job.transition_to(PipelinePhase::running(stage)).log();
                job.skip_stage(stage, FINAL_SKIPPED_MESSAGE);
            })
            .await?;

        let observer = self.observer(job_id, stage);
        for name in &job.selections.final_stage {
            if let Some(result) = job.final_stage.get(name) {
                observer.task_finished(result).await;
            }
        }
        self.emit_final_completed(&job);

        Ok(())
    }

    fn emit_final_completed(&self, job: &crate::models::JobDocument) {
        let completed = job
            .final_stage
            .values()
            .filter(|r| r.status == AnalyzerStatus::Completed)
            .count();

        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            job_id: job.job_id.clone(),
            stage: Stage::Final,
            completed,
            failed: job.final_stage.len() - completed,
            timestamp: Utc::now(),
        });
    }
}
