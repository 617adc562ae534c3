//! Service modules for the staged analysis pipeline

pub mod analyzer_task;
pub mod completion;
pub mod context_budget;
pub mod fan_in;
pub mod job_store;
pub mod parsers;
pub mod pipeline_orchestrator;
pub mod progress;
pub mod stage_runner;
pub mod templates;
pub mod token_counter;

pub use analyzer_task::{AnalyzerError, AnalyzerTask, RetryPolicy};
pub use completion::{
    Completion, CompletionClient, CompletionError, CompletionRequest, OpenAiCompatibleClient,
    RetryableKind,
};
pub use context_budget::{CombinedContext, ContextBudgetBuilder};
pub use fan_in::{FanInError, StageFanInAggregator};
pub use job_store::{ContextAuditStore, InMemoryJobStore, JobStateStore};
pub use parsers::{JsonBlockParser, OutputParser, ParseError, ParserRegistry, SectionParser};
pub use pipeline_orchestrator::{
    JobRequest, OrchestratorError, PipelineOrchestrator, PipelineSettings,
};
pub use progress::ProgressHints;
pub use stage_runner::{StageObserver, StageRunner};
pub use templates::{TemplateError, TemplateRegistry, TemplateRenderer};
pub use token_counter::{ModelFamily, TokenCounter};
