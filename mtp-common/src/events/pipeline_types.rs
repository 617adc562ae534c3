//! Shared pipeline vocabulary: stage identity and token accounting

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// One phase of the pipeline
///
/// Serialized as `stage_a`, `stage_b` and `final`. Deserialization goes
/// through [`Stage::normalize`], so every accepted external spelling maps
/// to one of exactly three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Stage {
    /// Transcript-only analyzers
    StageA,
    /// Analyzers fed with the combined Stage A context
    StageB,
    /// Analyzers fed with the combined Stage A + Stage B context
    Final,
}

impl Stage {
    /// Pipeline order
    pub const ALL: [Stage; 3] = [Stage::StageA, Stage::StageB, Stage::Final];

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::StageA => "stage_a",
            Stage::StageB => "stage_b",
            Stage::Final => "final",
        }
    }

    /// Map an external stage spelling onto the closed enum.
    ///
    /// Case, `_`, `-` and spaces are ignored: `stage_a`, `stageA`,
    /// `Stage-A` and `a` all resolve to [`Stage::StageA`].
    pub fn normalize(raw: &str) -> Option<Stage> {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "stagea" | "a" => Some(Stage::StageA),
            "stageb" | "b" => Some(Stage::StageB),
            "final" | "stagefinal" | "finalstage" => Some(Stage::Final),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::normalize(s).ok_or_else(|| Error::InvalidInput(format!("Unknown stage: {}", s)))
    }
}

impl TryFrom<String> for Stage {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Prompt/completion token counts for one call or a running total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt: u64,
    #[serde(default)]
    pub completion: u64,
    #[serde(default)]
    pub total: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    /// Add another usage record into this running total
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}
