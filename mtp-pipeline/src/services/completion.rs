//! LLM completion collaborator
//!
//! The pipeline only sees the [`CompletionClient`] trait. Failures are split
//! into retryable (timeouts, rate limits, transient transport or server
//! errors) and fatal (anything retrying cannot fix).

use async_trait::async_trait;
use mtp_common::config::LlmConfig;
use mtp_common::TokenUsage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use thiserror::Error;

/// One prompt to complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Successful completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub latency: Duration,
    /// Model that actually served the call
    pub model: String,
}

/// Why a retryable failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableKind {
    Timeout,
    RateLimited,
    Transient,
}

impl fmt::Display for RetryableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryableKind::Timeout => f.write_str("timeout"),
            RetryableKind::RateLimited => f.write_str("rate limited"),
            RetryableKind::Transient => f.write_str("transient"),
        }
    }
}

/// Completion failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// Worth another attempt after backoff
    #[error("{kind}: {message}")]
    Retryable { kind: RetryableKind, message: String },

    /// Retrying cannot help (bad request, auth, malformed response)
    #[error("{message}")]
    Fatal { message: String },
}

impl CompletionError {
    pub fn retryable(kind: RetryableKind, message: impl Into<String>) -> Self {
        CompletionError::Retryable {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        CompletionError::Fatal {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CompletionError::Retryable { .. })
    }
}

/// Black-box completion operation
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    rate_limiter: governor::DefaultDirectRateLimiter,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mtp-pipeline/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| CompletionError::fatal(format!("Failed to build HTTP client: {}", e)))?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = governor::RateLimiter::direct(governor::Quota::per_minute(per_minute));

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            rate_limiter,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        self.rate_limiter.until_ready().await;

        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
        };

        let started = Instant::now();
        let mut call = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::fatal(format!("Malformed completion response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::fatal("Completion response contained no choices"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        tracing::debug!(
            model = %request.model,
            prompt_tokens = usage.prompt,
            completion_tokens = usage.completion,
            latency_ms = started.elapsed().as_millis() as u64,
            "Completion received"
        );

        Ok(Completion {
            text,
            usage,
            latency: started.elapsed(),
            model: parsed.model.unwrap_or(request.model),
        })
    }
}

fn classify_transport_error(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::retryable(RetryableKind::Timeout, err.to_string())
    } else if err.is_builder() {
        CompletionError::fatal(format!("Invalid completion request: {}", err))
    } else {
        CompletionError::retryable(RetryableKind::Transient, err.to_string())
    }
}

/// Map a non-success HTTP status onto the failure taxonomy
pub fn classify_status(status: u16, detail: &str) -> CompletionError {
    let message = if detail.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, truncate_detail(detail))
    };

    match status {
        429 => CompletionError::retryable(RetryableKind::RateLimited, message),
        408 | 504 => CompletionError::retryable(RetryableKind::Timeout, message),
        500..=599 => CompletionError::retryable(RetryableKind::Transient, message),
        _ => CompletionError::fatal(message),
    }
}

fn truncate_detail(detail: &str) -> &str {
    const MAX_DETAIL: usize = 300;
    match detail.char_indices().nth(MAX_DETAIL) {
        Some((idx, _)) => &detail[..idx],
        None => detail,
    }
}
