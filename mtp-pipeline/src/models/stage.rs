//! Stage contracts: what input each stage's analyzers receive

use mtp_common::Stage;
use serde::Serialize;

/// Input source of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageInput {
    /// Transcript only
    Transcript,
    /// Combined upstream context only
    Context,
    /// Combined upstream context, transcript optional
    ContextWithOptionalTranscript,
}

impl StageInput {
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::StageA => StageInput::Transcript,
            Stage::StageB => StageInput::ContextWithOptionalTranscript,
            Stage::Final => StageInput::ContextWithOptionalTranscript,
        }
    }

    pub fn requires_transcript(&self) -> bool {
        matches!(self, StageInput::Transcript)
    }

    pub fn requires_context(&self) -> bool {
        !matches!(self, StageInput::Transcript)
    }
}

/// Variables available to a prompt template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptVariables {
    pub transcript: Option<String>,
    pub context: Option<String>,
}

impl PromptVariables {
    pub fn transcript(text: impl Into<String>) -> Self {
        Self {
            transcript: Some(text.into()),
            context: None,
        }
    }

    pub fn context(text: impl Into<String>) -> Self {
        Self {
            transcript: None,
            context: Some(text.into()),
        }
    }

    pub fn with_transcript(mut self, text: impl Into<String>) -> Self {
        self.transcript = Some(text.into());
        self
    }

    /// First variable the stage contract requires but that is absent
    pub fn missing_for(&self, input: StageInput) -> Option<&'static str> {
        if input.requires_transcript() && self.transcript.is_none() {
            return Some("transcript");
        }
        if input.requires_context() && self.context.is_none() {
            return Some("context");
        }
        None
    }
}

/// One runnable unit of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzerSpec {
    pub name: String,
    /// Key into the template registry
    pub template_ref: String,
}

/// Resolved stage for one run: contract plus ordered analyzers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSpec {
    pub stage: Stage,
    pub input: StageInput,
    pub analyzers: Vec<AnalyzerSpec>,
}

impl StageSpec {
    pub fn names(&self) -> Vec<String> {
        self.analyzers.iter().map(|a| a.name.clone()).collect()
    }
}
