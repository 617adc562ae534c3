//! Job document: the single persisted record of one pipeline run

use chrono::{DateTime, Utc};
use mtp_common::{Stage, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::analyzer::{AnalyzerResult, AnalyzerStatus};

/// Coarse job status exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

/// Orchestrator state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Queued,
    StageARunning,
    StageADone,
    StageBRunning,
    StageBDone,
    FinalRunning,
    Completed,
    Error,
}

impl PipelinePhase {
    pub fn running(stage: Stage) -> Self {
        match stage {
            Stage::StageA => PipelinePhase::StageARunning,
            Stage::StageB => PipelinePhase::StageBRunning,
            Stage::Final => PipelinePhase::FinalRunning,
        }
    }

    /// Final has no separate done phase; it leads straight to `Completed`
    pub fn done(stage: Stage) -> Self {
        match stage {
            Stage::StageA => PipelinePhase::StageADone,
            Stage::StageB => PipelinePhase::StageBDone,
            Stage::Final => PipelinePhase::Completed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelinePhase::Completed | PipelinePhase::Error)
    }
}

/// Record of a phase change
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTransition {
    pub job_id: String,
    pub old_phase: PipelinePhase,
    pub new_phase: PipelinePhase,
    pub transitioned_at: DateTime<Utc>,
}

impl PhaseTransition {
    pub fn log(&self) {
        tracing::debug!(
            job_id = %self.job_id,
            from = ?self.old_phase,
            to = ?self.new_phase,
            "Phase transition"
        );
    }
}

/// Ordered analyzer names per stage
///
/// Order is significant: fan-in zips these names positionally with the
/// stage runner's results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSelections {
    #[serde(default)]
    pub stage_a: Vec<String>,
    #[serde(default)]
    pub stage_b: Vec<String>,
    #[serde(default, rename = "final")]
    pub final_stage: Vec<String>,
}

impl StageSelections {
    pub fn for_stage(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::StageA => &self.stage_a,
            Stage::StageB => &self.stage_b,
            Stage::Final => &self.final_stage,
        }
    }

    pub fn total(&self) -> usize {
        self.stage_a.len() + self.stage_b.len() + self.final_stage.len()
    }
}

/// How the transcript is inlined when a stage includes it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptMode {
    #[default]
    Full,
    /// Head and tail excerpts joined by an elision marker
    Summary,
}

/// Per-stage run options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOptions {
    /// Pass the transcript alongside the context (ignored for Stage A,
    /// which always receives it)
    #[serde(default)]
    pub include_transcript: bool,
    #[serde(default)]
    pub transcript_mode: TranscriptMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_characters: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Job-level run options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default)]
    pub stage_a: StageOptions,
    #[serde(default)]
    pub stage_b: StageOptions,
    #[serde(default, rename = "final")]
    pub final_stage: StageOptions,
    /// Overrides the configured stop-on-error policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_error: Option<bool>,
    /// Overrides the configured per-stage concurrency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl JobOptions {
    pub fn for_stage(&self, stage: Stage) -> &StageOptions {
        match stage {
            Stage::StageA => &self.stage_a,
            Stage::StageB => &self.stage_b,
            Stage::Final => &self.final_stage,
        }
    }
}

/// One entry in the job's error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// None for job-level errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Full status document of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDocument {
    pub job_id: String,
    pub status: JobStatus,
    pub phase: PipelinePhase,
    pub selections: StageSelections,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub stage_a: BTreeMap<String, AnalyzerResult>,
    #[serde(default)]
    pub stage_b: BTreeMap<String, AnalyzerResult>,
    #[serde(default, rename = "final")]
    pub final_stage: BTreeMap<String, AnalyzerResult>,
    /// Stages whose results have been persisted, in pipeline order
    #[serde(default)]
    pub stages_completed: Vec<Stage>,
    #[serde(default)]
    pub token_usage_total: TokenUsage,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub transcript_chars: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_processing_time_seconds: Option<f64>,
}

impl JobDocument {
    /// Create a queued job with every selected analyzer seeded as pending
    pub fn new(
        job_id: String,
        selections: StageSelections,
        options: JobOptions,
        transcript_chars: usize,
    ) -> Self {
        let seed = |names: &[String]| {
            names
                .iter()
                .map(|name| (name.clone(), AnalyzerResult::pending(name.clone())))
                .collect::<BTreeMap<_, _>>()
        };

        Self {
            job_id,
            status: JobStatus::Queued,
            phase: PipelinePhase::Queued,
            stage_a: seed(&selections.stage_a),
            stage_b: seed(&selections.stage_b),
            final_stage: seed(&selections.final_stage),
            selections,
            options,
            stages_completed: Vec::new(),
            token_usage_total: TokenUsage::default(),
            errors: Vec::new(),
            transcript_chars,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_processing_time_seconds: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stage_results(&self, stage: Stage) -> &BTreeMap<String, AnalyzerResult> {
        match stage {
            Stage::StageA => &self.stage_a,
            Stage::StageB => &self.stage_b,
            Stage::Final => &self.final_stage,
        }
    }

    fn stage_results_mut(&mut self, stage: Stage) -> &mut BTreeMap<String, AnalyzerResult> {
        match stage {
            Stage::StageA => &mut self.stage_a,
            Stage::StageB => &mut self.stage_b,
            Stage::Final => &mut self.final_stage,
        }
    }

    pub fn is_stage_completed(&self, stage: Stage) -> bool {
        self.stages_completed.contains(&stage)
    }

    /// Completed results of a stage in selection order
    pub fn completed_outputs(&self, stage: Stage) -> Vec<(String, String)> {
        let results = self.stage_results(stage);
        self.selections
            .for_stage(stage)
            .iter()
            .filter_map(|name| {
                let result = results.get(name)?;
                match (&result.status, &result.raw_output) {
                    (AnalyzerStatus::Completed, Some(text)) => Some((name.clone(), text.clone())),
                    _ => None,
                }
            })
            .collect()
    }

    /// Move the state machine; terminal phases also set the terminal status
    pub fn transition_to(&mut self, new_phase: PipelinePhase) -> PhaseTransition {
        let old_phase = self.phase;
        self.phase = new_phase;

        match new_phase {
            PipelinePhase::Queued => {}
            PipelinePhase::Completed => self.status = JobStatus::Completed,
            PipelinePhase::Error => self.status = JobStatus::Error,
            _ => {
                if self.status == JobStatus::Queued {
                    self.started_at = Some(Utc::now());
                }
                self.status = JobStatus::Running;
            }
        }

        if new_phase.is_terminal() {
            let now = Utc::now();
            self.completed_at = Some(now);
            self.total_processing_time_seconds = self
                .started_at
                .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0);
        }

        PhaseTransition {
            job_id: self.job_id.clone(),
            old_phase,
            new_phase,
            transitioned_at: Utc::now(),
        }
    }

    /// Replace a stage's whole mapping in one step
    ///
    /// Token usage of completed entries is added to the job total and error
    /// entries are appended to the error log.
    pub fn apply_stage_mapping(
        &mut self,
        stage: Stage,
        mapping: BTreeMap<String, AnalyzerResult>,
    ) {
        for name in self.selections.for_stage(stage).to_vec() {
            if let Some(result) = mapping.get(&name) {
                self.account(stage, result);
            }
        }
        *self.stage_results_mut(stage) = mapping;
        if !self.stages_completed.contains(&stage) {
            self.stages_completed.push(stage);
        }
    }

    /// Write one analyzer result in place
    ///
    /// Returns false (document untouched) when the entry is unknown or
    /// already terminal.
    pub fn record_result(&mut self, stage: Stage, result: AnalyzerResult) -> bool {
        let writable = self
            .stage_results(stage)
            .get(&result.analyzer_name)
            .is_some_and(|existing| !existing.is_terminal());
        if !writable {
            return false;
        }

        self.account(stage, &result);
        self.stage_results_mut(stage)
            .insert(result.analyzer_name.clone(), result);
        true
    }

    /// Mark the stage as fully written (sequential stages)
    pub fn mark_stage_completed(&mut self, stage: Stage) {
        if !self.stages_completed.contains(&stage) {
            self.stages_completed.push(stage);
        }
    }

    fn account(&mut self, stage: Stage, result: &AnalyzerResult) {
        match result.status {
            AnalyzerStatus::Completed => self.token_usage_total.accumulate(&result.token_usage),
            AnalyzerStatus::Error => self.errors.push(ErrorRecord {
                stage: Some(stage),
                analyzer: Some(result.analyzer_name.clone()),
                message: result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
                timestamp: result.completed_at.unwrap_or_else(Utc::now),
            }),
            AnalyzerStatus::Pending | AnalyzerStatus::Processing => {}
        }
    }

    /// Put the job in the error state
    ///
    /// Every analyzer that never reached a terminal status gets `message`
    /// so no entry is left pending.
    pub fn fail(&mut self, message: &str) -> PhaseTransition {
        for stage in Stage::ALL {
            for result in self.stage_results_mut(stage).values_mut() {
                if !result.is_terminal() {
                    *result = AnalyzerResult::failed(result.analyzer_name.clone(), message);
                }
            }
        }
        self.errors.push(ErrorRecord {
            stage: None,
            analyzer: None,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        self.transition_to(PipelinePhase::Error)
    }

    /// Mark every non-terminal analyzer of one stage as failed
    pub fn skip_stage(&mut self, stage: Stage, message: &str) {
        let pending: Vec<String> = self
            .stage_results(stage)
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.analyzer_name.clone())
            .collect();
        for name in pending {
            self.record_result(stage, AnalyzerResult::failed(name, message));
        }
        self.mark_stage_completed(stage);
    }

    pub fn summary(&self) -> JobSummary {
        let analyzer_count = self.selections.total();
        let failed_count = Stage::ALL
            .iter()
            .flat_map(|stage| self.stage_results(*stage).values())
            .filter(|r| r.status == AnalyzerStatus::Error)
            .count();

        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            phase: self.phase,
            analyzer_count,
            failed_count,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Compact listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub phase: PipelinePhase,
    pub analyzer_count: usize,
    pub failed_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
