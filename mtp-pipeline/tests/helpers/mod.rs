//! Shared fixtures for pipeline integration tests
//!
//! Prompts rendered from [`test_templates`] start with `ANALYZER:<name>`, so
//! [`ScriptedClient`] can tell which analyzer is calling without any
//! knowledge of the orchestrator.

#![allow(dead_code)]

use async_trait::async_trait;
use mtp_common::events::{EventBus, PipelineEvent};
use mtp_common::{Stage, TokenUsage};
use mtp_pipeline::models::JobDocument;
use mtp_pipeline::services::{
    Completion, CompletionClient, CompletionError, CompletionRequest, InMemoryJobStore,
    JobStateStore, PipelineOrchestrator, PipelineSettings, RetryPolicy, RetryableKind,
    TemplateRegistry,
};
use mtp_pipeline::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Scripted behavior of one analyzer
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Retryable failures before the first success
    pub transient_failures: u32,
    /// Every call fails without retry
    pub fatal: bool,
    /// Delay before answering
    pub delay_ms: u64,
}

/// Deterministic completion client driven by per-analyzer scripts
#[derive(Default)]
pub struct ScriptedClient {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
    prompts: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, analyzer: &str, script: Script) -> Self {
        self.scripts.insert(analyzer.to_string(), script);
        self
    }

    pub async fn calls(&self, analyzer: &str) -> u32 {
        self.calls.lock().await.get(analyzer).copied().unwrap_or(0)
    }

    /// Every prompt the analyzer was sent, retries included
    pub async fn prompts(&self, analyzer: &str) -> Vec<String> {
        self.prompts
            .lock()
            .await
            .get(analyzer)
            .cloned()
            .unwrap_or_default()
    }
}

fn analyzer_of(prompt: &str) -> String {
    prompt
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("ANALYZER:"))
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let analyzer = analyzer_of(&request.prompt);
        let script = self.scripts.get(&analyzer).cloned().unwrap_or_default();

        let call = {
            let mut calls = self.calls.lock().await;
            let count = calls.entry(analyzer.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.prompts
            .lock()
            .await
            .entry(analyzer.clone())
            .or_default()
            .push(request.prompt.clone());

        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }

        if script.fatal {
            return Err(CompletionError::fatal(format!("{} rejected the prompt", analyzer)));
        }
        if call <= script.transient_failures {
            return Err(CompletionError::retryable(
                RetryableKind::Transient,
                format!("{} attempt {} failed", analyzer, call),
            ));
        }

        // Echo the transcript marker so outputs can be traced to their job
        let marker = request
            .prompt
            .split_whitespace()
            .find(|word| word.starts_with("JOB-"))
            .unwrap_or("JOB-?");
        Ok(Completion {
            text: format!("{} findings for {} (attempt {})", analyzer, marker, call),
            usage: TokenUsage::new(10, 5),
            latency: Duration::from_millis(script.delay_ms),
            model: request.model,
        })
    }
}

/// Registry whose prompts identify their analyzer on the first line
pub fn test_templates() -> TemplateRegistry {
    let mut registry = TemplateRegistry::new();
    for name in [
        "say_means", "perspective", "premises", "postulate", "x", "y", "a1", "a2", "b1", "b2",
    ] {
        registry.insert(
            Stage::StageA,
            name,
            format!("ANALYZER:{}\nTranscript:\n{{{{transcript}}}}", name),
        );
    }
    for name in ["z", "synthesis"] {
        registry.insert(
            Stage::StageB,
            name,
            format!("ANALYZER:{}\nContext:\n{{{{context}}}}", name),
        );
    }
    for name in ["report", "r1", "r2"] {
        registry.insert(
            Stage::Final,
            name,
            format!("ANALYZER:{}\nContext:\n{{{{context}}}}", name),
        );
    }
    registry
}

/// Defaults with millisecond backoff so retry tests stay fast
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            call_timeout: Duration::from_secs(5),
        },
        ..PipelineSettings::default()
    }
}

pub struct TestPipeline {
    pub store: Arc<InMemoryJobStore>,
    pub client: Arc<ScriptedClient>,
    pub event_bus: EventBus,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl TestPipeline {
    pub fn new(client: ScriptedClient) -> Self {
        Self::with_settings(client, fast_settings())
    }

    pub fn with_settings(client: ScriptedClient, settings: PipelineSettings) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let client = Arc::new(client);
        let event_bus = EventBus::new(1024);
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            store.clone(),
            store.clone(),
            event_bus.clone(),
            client.clone(),
            Arc::new(test_templates()),
            settings,
        ));
        Self {
            store,
            client,
            event_bus,
            orchestrator,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.store.clone(),
            self.store.clone(),
            self.event_bus.clone(),
            self.orchestrator.clone(),
        )
    }

    /// Poll the store until the job is terminal
    pub async fn wait_for_terminal(&self, job_id: &str) -> JobDocument {
        wait_for_terminal(self.store.as_ref(), job_id).await
    }
}

pub async fn wait_for_terminal(store: &dyn JobStateStore, job_id: &str) -> JobDocument {
    let poll = async {
        loop {
            if let Some(job) = store.get(job_id).await.unwrap() {
                if job.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("job did not reach a terminal state in time")
}

/// Drain events until the job's terminal event arrives
pub async fn collect_job_events(
    rx: &mut broadcast::Receiver<PipelineEvent>,
    job_id: &str,
) -> Vec<PipelineEvent> {
    let collect = async {
        let mut events = Vec::new();
        loop {
            let event = rx.recv().await.expect("event bus closed or lagged");
            if event.job_id() != job_id {
                continue;
            }
            let done = matches!(
                event,
                PipelineEvent::JobCompleted { .. } | PipelineEvent::JobError { .. }
            );
            events.push(event);
            if done {
                return events;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("terminal event not received in time")
}

pub fn event_types(events: &[PipelineEvent]) -> Vec<&'static str> {
    events.iter().map(PipelineEvent::event_type).collect()
}
