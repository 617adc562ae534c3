//! Stage B: analyzers over the combined Stage A context, run in parallel

use mtp_common::Stage;
use tokio_util::sync::CancellationToken;

use super::context::transcript_for;
use super::{OrchestratorError, PipelineOrchestrator};
use crate::models::{ContextTransition, PipelinePhase, PromptVariables};

impl PipelineOrchestrator {
    /// Stage B - context composed from the persisted Stage A mapping
    ///
    /// Runs even when no Stage A analyzer completed; the context is then
    /// empty rather than missing.
    pub(super) async fn phase_stage_b(
        &self,
        job_id: &str,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let stage = Stage::StageB;
        let job = self.load_job(job_id).await?;
        let names = job.selections.stage_b.clone();
        if names.is_empty() {
            return self.skip_empty_stage(job_id, stage).await;
        }

        let spec = self.templates.stage_spec(stage, &names)?;
        let contributions = job.completed_outputs(Stage::StageA);
        if contributions.is_empty() {
            tracing::warn!(job_id = %job_id, "Stage B: no completed Stage A output, using empty context");
        }

        let context = self
            .compose_context(
                job_id,
                ContextTransition::StageAToStageB,
                &contributions,
                self.settings.context_token_budget,
            )
            .await?;

        let job = self
            .update_job(job_id, |job| {
                job.transition_to(PipelinePhase::running(stage)).log();
            })
            .await?;

        let mut variables = PromptVariables::context(context.text);
        if let Some(text) = transcript_for(job.options.for_stage(stage), transcript) {
            variables = variables.with_transcript(text);
        }

        tracing::info!(
            job_id = %job_id,
            analyzers = names.len(),
            contributors = contributions.len(),
            "Stage B: running context analyzers"
        );

        let results = self.run_parallel_stage(&job, &spec, variables, cancel).await;
        self.fan_in.finalize(job_id, stage, &names, results).await?;

        Ok(())
    }
}
