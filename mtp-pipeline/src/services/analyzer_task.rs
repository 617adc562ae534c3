//! One analyzer run: validate inputs, render, complete with retry, parse
//!
//! The task never emits events and never touches the job document. It
//! always returns an [`AnalyzerResult`]; failures come back as `error`
//! results, not as `Err`.

use mtp_common::Stage;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::completion::{Completion, CompletionClient, CompletionError, CompletionRequest, RetryableKind};
use super::parsers::OutputParser;
use super::templates::TemplateRenderer;
use crate::models::{AnalyzerResult, AnalyzerSpec, PromptVariables, StageInput};

/// Analyzer failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzerError {
    /// Missing input or template problem; no completion call was made
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Non-retryable completion failure
    #[error("{0}")]
    Fatal(String),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Attempt limit and backoff for completion calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on a single completion call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`, plus up to 10% jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter_ms = (delay.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// A configured analyzer ready to run against prompt variables
pub struct AnalyzerTask {
    stage: Stage,
    spec: AnalyzerSpec,
    model: String,
    max_tokens: u32,
    completion: Arc<dyn CompletionClient>,
    renderer: Arc<dyn TemplateRenderer>,
    parser: Option<Arc<dyn OutputParser>>,
    retry: RetryPolicy,
}

impl AnalyzerTask {
    pub fn new(
        stage: Stage,
        spec: AnalyzerSpec,
        model: impl Into<String>,
        max_tokens: u32,
        completion: Arc<dyn CompletionClient>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            stage,
            spec,
            model: model.into(),
            max_tokens,
            completion,
            renderer,
            parser: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_parser(mut self, parser: Option<Arc<dyn OutputParser>>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Run to a terminal result
    pub async fn run(&self, variables: &PromptVariables) -> AnalyzerResult {
        let started = Instant::now();
        let mut attempts = 0;

        let outcome = self.execute(variables, &mut attempts).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(completion) => {
                let structured_data = self.parse(&completion.text);
                let mut result = AnalyzerResult::completed(
                    self.spec.name.clone(),
                    completion.text,
                    completion.usage,
                    completion.model,
                )
                .with_timing(elapsed, attempts);
                result.structured_data = structured_data;
                result
            }
            Err(err) => {
                tracing::warn!(
                    stage = %self.stage,
                    analyzer = %self.spec.name,
                    attempts,
                    error = %err,
                    "Analyzer failed"
                );
                let mut result = AnalyzerResult::failed(self.spec.name.clone(), err.to_string())
                    .with_timing(elapsed, attempts);
                if attempts > 0 {
                    result.model_used = Some(self.model.clone());
                }
                result
            }
        }
    }

    async fn execute(
        &self,
        variables: &PromptVariables,
        attempts: &mut u32,
    ) -> Result<Completion, AnalyzerError> {
        if let Some(missing) = variables.missing_for(StageInput::for_stage(self.stage)) {
            return Err(AnalyzerError::Configuration(format!(
                "{} analyzers require '{}'",
                self.stage, missing
            )));
        }

        let prompt = self
            .renderer
            .render(&self.spec.template_ref, variables)
            .map_err(|e| AnalyzerError::Configuration(e.to_string()))?;

        let request = CompletionRequest {
            prompt,
            model: self.model.clone(),
            max_tokens: self.max_tokens,
        };

        let max_attempts = self.retry.max_attempts.max(1);
        loop {
            *attempts += 1;
            let call = self.completion.complete(request.clone());
            let outcome = match tokio::time::timeout(self.retry.call_timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CompletionError::retryable(
                    RetryableKind::Timeout,
                    format!("no response within {:?}", self.retry.call_timeout),
                )),
            };

            match outcome {
                Ok(completion) => return Ok(completion),
                Err(CompletionError::Fatal { message }) => return Err(AnalyzerError::Fatal(message)),
                Err(err) if *attempts >= max_attempts => {
                    return Err(AnalyzerError::RetriesExhausted {
                        attempts: *attempts,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.retry.backoff_delay(*attempts);
                    tracing::debug!(
                        stage = %self.stage,
                        analyzer = %self.spec.name,
                        attempt = *attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable completion failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn parse(&self, raw_output: &str) -> Option<serde_json::Value> {
        let parser = self.parser.as_ref()?;
        match parser.parse(raw_output) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    stage = %self.stage,
                    analyzer = %self.spec.name,
                    error = %e,
                    "Structured parse failed, keeping raw output only"
                );
                None
            }
        }
    }
}
