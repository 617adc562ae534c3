//! Data models for mtp-pipeline

pub mod analyzer;
pub mod context;
pub mod job;
pub mod stage;

pub use analyzer::{AnalyzerResult, AnalyzerStatus};
pub use context::{ContextSnapshot, ContextTransition};
pub use job::{
    ErrorRecord, JobDocument, JobOptions, JobStatus, JobSummary, PipelinePhase, StageOptions,
    StageSelections, TranscriptMode,
};
pub use mtp_common::{Stage, TokenUsage};
pub use stage::{AnalyzerSpec, PromptVariables, StageInput, StageSpec};
