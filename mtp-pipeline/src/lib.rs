//! mtp-pipeline library interface
//!
//! Staged LLM analysis of meeting transcripts: Stage A analyzers read the
//! transcript in parallel, Stage B analyzers read a token-budgeted digest of
//! Stage A, and Final analyzers read a digest of both. Exposes the pipeline
//! services, SQLite persistence and the HTTP/SSE API for integration
//! testing.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use mtp_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::{ContextAuditStore, JobStateStore, PipelineOrchestrator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job documents and transcripts
    pub store: Arc<dyn JobStateStore>,
    /// Combined-context audit trail
    pub contexts: Arc<dyn ContextAuditStore>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStateStore>,
        contexts: Arc<dyn ContextAuditStore>,
        event_bus: EventBus,
        orchestrator: Arc<PipelineOrchestrator>,
    ) -> Self {
        Self {
            store,
            contexts,
            event_bus,
            orchestrator,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember an internal failure for `/health`
    pub async fn record_error(&self, error: &ApiError) {
        *self.last_error.write().await = Some(error.to_string());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .merge(api::analyzer_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .route("/jobs/:job_id/events", get(api::job_event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
