//! # MTP Common Library
//!
//! Shared code for the meeting transcript pipeline service:
//! - Error type and result alias
//! - Lifecycle event types (PipelineEvent enum) and the EventBus
//! - Stage identity and token usage accounting
//! - Configuration loading and root folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent, Stage, TokenUsage};
