//! Per-analyzer outcome records

use chrono::{DateTime, Utc};
use mtp_common::TokenUsage;
use serde::{Deserialize, Serialize};

/// Analyzer lifecycle status
///
/// `Processing` is never stored in a job document. It only appears in status
/// responses, overlaid from the progress hint board onto `Pending` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl AnalyzerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalyzerStatus::Completed | AnalyzerStatus::Error)
    }
}

/// Outcome of one analyzer task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerResult {
    pub analyzer_name: String,
    pub status: AnalyzerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    /// Parser output; opaque to the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<serde_json::Value>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub processing_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Completion calls made, retries included
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalyzerResult {
    /// Seed entry written before any task runs
    pub fn pending(analyzer_name: impl Into<String>) -> Self {
        Self {
            analyzer_name: analyzer_name.into(),
            status: AnalyzerStatus::Pending,
            raw_output: None,
            structured_data: None,
            token_usage: TokenUsage::default(),
            processing_time_seconds: 0.0,
            error_message: None,
            model_used: None,
            attempts: 0,
            completed_at: None,
        }
    }

    pub fn completed(
        analyzer_name: impl Into<String>,
        raw_output: String,
        token_usage: TokenUsage,
        model_used: String,
    ) -> Self {
        Self {
            status: AnalyzerStatus::Completed,
            raw_output: Some(raw_output),
            token_usage,
            model_used: Some(model_used),
            completed_at: Some(Utc::now()),
            ..Self::pending(analyzer_name)
        }
    }

    pub fn failed(analyzer_name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            status: AnalyzerStatus::Error,
            error_message: Some(error_message.into()),
            completed_at: Some(Utc::now()),
            ..Self::pending(analyzer_name)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.status == AnalyzerStatus::Completed
    }

    pub fn with_timing(mut self, processing_time_seconds: f64, attempts: u32) -> Self {
        self.processing_time_seconds = processing_time_seconds;
        self.attempts = attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_status() {
        assert_eq!(AnalyzerResult::pending("a").status, AnalyzerStatus::Pending);
        assert!(!AnalyzerResult::pending("a").is_terminal());

        let done = AnalyzerResult::completed("a", "text".into(), TokenUsage::new(3, 4), "m".into());
        assert!(done.is_completed());
        assert_eq!(done.token_usage.total, 7);
        assert!(done.completed_at.is_some());

        let failed = AnalyzerResult::failed("a", "boom");
        assert_eq!(failed.status, AnalyzerStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_serializes_camel_case_and_skips_empty_fields() {
        let value = serde_json::to_value(AnalyzerResult::pending("premises")).unwrap();
        assert_eq!(value["analyzerName"], "premises");
        assert_eq!(value["status"], "pending");
        assert!(value.get("rawOutput").is_none());
        assert!(value.get("errorMessage").is_none());
    }
}
