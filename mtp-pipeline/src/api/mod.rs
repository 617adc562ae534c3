//! HTTP API handlers for mtp-pipeline
//!
//! REST endpoints for job submission and inspection, plus SSE streams of
//! pipeline events.

pub mod analyzers;
pub mod health;
pub mod jobs;
pub mod sse;

pub use analyzers::analyzer_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::{event_stream, job_event_stream};
