//! Audit records for combined contexts built between stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stage boundary a combined context was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTransition {
    /// Stage A outputs feeding Stage B
    StageAToStageB,
    /// Stage A and Stage B outputs feeding Final
    StagesAbToFinal,
}

impl ContextTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextTransition::StageAToStageB => "stage_a_to_stage_b",
            ContextTransition::StagesAbToFinal => "stages_ab_to_final",
        }
    }
}

impl fmt::Display for ContextTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextTransition {
    type Err = mtp_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage_a_to_stage_b" => Ok(ContextTransition::StageAToStageB),
            "stages_ab_to_final" => Ok(ContextTransition::StagesAbToFinal),
            other => Err(mtp_common::Error::InvalidInput(format!(
                "Unknown context transition: {}",
                other
            ))),
        }
    }
}

/// Combined context as handed to the next stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub job_id: String,
    pub transition: ContextTransition,
    pub text: String,
    /// Tokens granted to each contributor
    pub allocations: BTreeMap<String, usize>,
    pub token_budget: i64,
    /// Estimated tokens of `text`, labels included
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}
