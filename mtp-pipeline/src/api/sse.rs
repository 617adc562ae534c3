//! Server-Sent Events (SSE) for pipeline progress streaming
//!
//! Every [`PipelineEvent`] is sent with its dotted type as the SSE event
//! name and its JSON form as data.

use crate::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use mtp_common::events::PipelineEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn to_sse(event: &PipelineEvent) -> Option<Event> {
    let event_type = event.event_type();
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event_type).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

/// Forward bus events matching `job_filter` (all events when `None`)
fn pipeline_stream(
    state: AppState,
    job_filter: Option<String>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut rx = state.event_bus.subscribe();

    async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            let wanted = job_filter
                                .as_deref()
                                .map_or(true, |job_id| event.job_id() == job_id);
                            if wanted {
                                if let Some(sse) = to_sse(&event) {
                                    yield Ok(sse);
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "SSE: Client lagged, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}

/// GET /events - all pipeline events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to pipeline events");

    Sse::new(pipeline_stream(state, None))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}

/// GET /jobs/:job_id/events - events of a single job
pub async fn job_event_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(job_id = %job_id, "New SSE client connected to job events");

    Sse::new(pipeline_stream(state, Some(job_id)))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}
