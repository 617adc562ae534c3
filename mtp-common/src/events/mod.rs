//! Pipeline lifecycle events and the in-process event bus
//!
//! Events are best-effort telemetry: emitting never fails the caller and a
//! subscriber that falls behind simply loses the oldest events.

mod pipeline_types;

pub use pipeline_types::{Stage, TokenUsage};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle events for pipeline jobs
///
/// The serialized `type` tag doubles as the SSE event name (`job.queued`,
/// `analyzer.completed`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    /// Job document seeded and persisted
    #[serde(rename = "job.queued")]
    JobQueued {
        job_id: String,
        analyzer_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Orchestrator picked the job up
    #[serde(rename = "job.started")]
    JobStarted {
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Analyzer task acquired a concurrency slot and began work
    #[serde(rename = "analyzer.started")]
    AnalyzerStarted {
        job_id: String,
        stage: Stage,
        analyzer: String,
        timestamp: DateTime<Utc>,
    },

    /// Analyzer task finished with a completion
    #[serde(rename = "analyzer.completed")]
    AnalyzerCompleted {
        job_id: String,
        stage: Stage,
        analyzer: String,
        token_usage: TokenUsage,
        processing_time_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Analyzer task finished in error (after any retries)
    #[serde(rename = "analyzer.error")]
    AnalyzerError {
        job_id: String,
        stage: Stage,
        analyzer: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Stage mapping has been persisted
    #[serde(rename = "stage.completed")]
    StageCompleted {
        job_id: String,
        stage: Stage,
        completed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job reached the completed terminal state
    #[serde(rename = "job.completed")]
    JobCompleted {
        job_id: String,
        total_token_usage: TokenUsage,
        total_processing_time_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Job reached the error terminal state
    #[serde(rename = "job.error")]
    JobError {
        job_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Cancellation requested; no further stages will be scheduled
    #[serde(rename = "job.cancelled")]
    JobCancelled {
        job_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Dotted event name, identical to the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::JobQueued { .. } => "job.queued",
            PipelineEvent::JobStarted { .. } => "job.started",
            PipelineEvent::AnalyzerStarted { .. } => "analyzer.started",
            PipelineEvent::AnalyzerCompleted { .. } => "analyzer.completed",
            PipelineEvent::AnalyzerError { .. } => "analyzer.error",
            PipelineEvent::StageCompleted { .. } => "stage.completed",
            PipelineEvent::JobCompleted { .. } => "job.completed",
            PipelineEvent::JobError { .. } => "job.error",
            PipelineEvent::JobCancelled { .. } => "job.cancelled",
        }
    }

    /// Job this event belongs to
    pub fn job_id(&self) -> &str {
        match self {
            PipelineEvent::JobQueued { job_id, .. }
            | PipelineEvent::JobStarted { job_id, .. }
            | PipelineEvent::AnalyzerStarted { job_id, .. }
            | PipelineEvent::AnalyzerCompleted { job_id, .. }
            | PipelineEvent::AnalyzerError { job_id, .. }
            | PipelineEvent::StageCompleted { job_id, .. }
            | PipelineEvent::JobCompleted { job_id, .. }
            | PipelineEvent::JobError { job_id, .. }
            | PipelineEvent::JobCancelled { job_id, .. } => job_id,
        }
    }
}

/// Broadcast channel shared by the orchestrator and SSE handlers
///
/// Cloning is cheap; all clones publish to the same channel.
///
/// ```
/// use mtp_common::events::{EventBus, PipelineEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(PipelineEvent::JobStarted {
///     job_id: "job-1".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert_eq!(rx.try_recv().unwrap().event_type(), "job.started");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers connected");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
