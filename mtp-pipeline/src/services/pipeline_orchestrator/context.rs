//! Stage-boundary inputs: combined contexts and transcript inclusion

use chrono::Utc;
use mtp_common::Stage;

use super::{OrchestratorError, PipelineOrchestrator};
use crate::models::{ContextSnapshot, ContextTransition, StageOptions, TranscriptMode};
use crate::services::context_budget::CombinedContext;

/// Character limit for `summary` mode when the stage sets none
const DEFAULT_SUMMARY_CHARS: usize = 4000;

/// Prefix `stage_a/` or `stage_b/` to contributor names for the Final context
pub(super) fn qualify(stage: Stage, outputs: Vec<(String, String)>) -> Vec<(String, String)> {
    outputs
        .into_iter()
        .map(|(name, text)| (format!("{}/{}", stage.as_str(), name), text))
        .collect()
}

fn char_boundary(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Full transcript, clipped to `max_characters` when set
pub fn clip_transcript(transcript: &str, max_characters: Option<usize>) -> &str {
    match max_characters {
        Some(max) => &transcript[..char_boundary(transcript, max)],
        None => transcript,
    }
}

/// Head and tail of the transcript joined by an elision marker
///
/// The two excerpts together hold at most `max_characters` characters.
/// Shorter transcripts are returned whole.
pub fn summarize_transcript(transcript: &str, max_characters: usize) -> String {
    let total = transcript.chars().count();
    if total <= max_characters {
        return transcript.to_string();
    }

    let head_chars = max_characters / 2;
    let tail_chars = max_characters - head_chars;
    let head = &transcript[..char_boundary(transcript, head_chars)];
    let tail = &transcript[char_boundary(transcript, total - tail_chars)..];
    let omitted = total - head_chars - tail_chars;

    format!(
        "{}\n\n[... {} characters omitted ...]\n\n{}",
        head.trim_end(),
        omitted,
        tail.trim_start()
    )
}

/// Transcript text a context stage receives, if its options include it
pub(super) fn transcript_for(options: &StageOptions, transcript: &str) -> Option<String> {
    if !options.include_transcript {
        return None;
    }
    Some(match options.transcript_mode {
        TranscriptMode::Full => clip_transcript(transcript, options.max_characters).to_string(),
        TranscriptMode::Summary => summarize_transcript(
            transcript,
            options.max_characters.unwrap_or(DEFAULT_SUMMARY_CHARS),
        ),
    })
}

impl PipelineOrchestrator {
    /// Build a combined context and keep an audit copy
    ///
    /// A failed audit write is logged; it never fails the job.
    pub(super) async fn compose_context(
        &self,
        job_id: &str,
        transition: ContextTransition,
        contributions: &[(String, String)],
        token_budget: i64,
    ) -> Result<CombinedContext, OrchestratorError> {
        let combined = self.budget.build(
            contributions,
            token_budget,
            self.settings.min_tokens_per_contributor,
        );
        let token_count = self.budget.counter().count(&combined.text);

        tracing::debug!(
            job_id = %job_id,
            transition = %transition,
            contributors = contributions.len(),
            token_budget,
            token_count,
            allocations = ?combined.allocations,
            "Combined context built"
        );

        let snapshot = ContextSnapshot {
            job_id: job_id.to_string(),
            transition,
            text: combined.text.clone(),
            allocations: combined.allocations.clone(),
            token_budget,
            token_count,
            created_at: Utc::now(),
        };
        if let Err(e) = self.contexts.record(&snapshot).await {
            tracing::warn!(
                job_id = %job_id,
                transition = %transition,
                error = %e,
                "Failed to record combined context"
            );
        }

        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_transcript_counts_characters() {
        assert_eq!(clip_transcript("héllo world", Some(5)), "héllo");
        assert_eq!(clip_transcript("short", Some(50)), "short");
        assert_eq!(clip_transcript("short", None), "short");
    }

    #[test]
    fn test_summarize_keeps_head_and_tail() {
        let transcript = format!("{}{}{}", "a".repeat(10), "m".repeat(80), "z".repeat(10));
        let summary = summarize_transcript(&transcript, 20);

        assert!(summary.starts_with(&"a".repeat(10)));
        assert!(summary.ends_with(&"z".repeat(10)));
        assert!(summary.contains("[... 80 characters omitted ...]"));
        assert!(!summary.contains('m'));

        assert_eq!(summarize_transcript("tiny", 20), "tiny");
    }

    #[test]
    fn test_transcript_for_respects_options() {
        let mut options = StageOptions::default();
        assert_eq!(transcript_for(&options, "text"), None);

        options.include_transcript = true;
        options.max_characters = Some(2);
        assert_eq!(transcript_for(&options, "text").as_deref(), Some("te"));

        options.transcript_mode = TranscriptMode::Summary;
        options.max_characters = Some(100);
        assert_eq!(transcript_for(&options, "text").as_deref(), Some("text"));
    }

    #[test]
    fn test_qualify_prefixes_stage() {
        let qualified = qualify(
            Stage::StageB,
            vec![("synthesis".to_string(), "body".to_string())],
        );
        assert_eq!(qualified[0].0, "stage_b/synthesis");
        assert_eq!(qualified[0].1, "body");
    }
}
