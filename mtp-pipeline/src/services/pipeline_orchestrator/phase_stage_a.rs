//! Stage A: transcript-only analyzers, run in parallel

use mtp_common::Stage;
use tokio_util::sync::CancellationToken;

use super::{OrchestratorError, PipelineOrchestrator};
use crate::models::{JobDocument, PromptVariables};

impl PipelineOrchestrator {
    /// Stage A - every selected analyzer reads the transcript
    ///
    /// `job` is already in `stage_a_running`.
    pub(super) async fn phase_stage_a(
        &self,
        job: &JobDocument,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let stage = Stage::StageA;
        let names = job.selections.stage_a.clone();
        if names.is_empty() {
            return self.skip_empty_stage(&job.job_id, stage).await;
        }

        let spec = self.templates.stage_spec(stage, &names)?;

        tracing::info!(
            job_id = %job.job_id,
            analyzers = names.len(),
            "Stage A: running transcript analyzers"
        );

        let results = self
            .run_parallel_stage(job, &spec, PromptVariables::transcript(transcript), cancel)
            .await;
        self.fan_in
            .finalize(&job.job_id, stage, &names, results)
            .await?;

        Ok(())
    }
}
