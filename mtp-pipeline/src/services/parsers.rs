//! Pluggable structured-output parsers
//!
//! A parser turns an analyzer's raw completion into JSON for the UI. Parse
//! failures never fail the analyzer; the result simply has no structured data.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No structured content found")]
    NoContent,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait OutputParser: Send + Sync {
    fn parse(&self, raw_output: &str) -> Result<Value, ParseError>;
}

/// Extracts a JSON object from a fenced ```json block, the whole body, or
/// the outermost `{...}` span, in that order
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBlockParser;

impl OutputParser for JsonBlockParser {
    fn parse(&self, raw_output: &str) -> Result<Value, ParseError> {
        if let Some(block) = fenced_json(raw_output) {
            return Ok(serde_json::from_str(block)?);
        }

        let trimmed = raw_output.trim();
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Ok(value);
        }

        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                Ok(serde_json::from_str(&trimmed[start..=end])?)
            }
            _ => Err(ParseError::NoContent),
        }
    }
}

fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Splits markdown into `{ "sections": { heading: body } }`
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionParser;

impl OutputParser for SectionParser {
    fn parse(&self, raw_output: &str) -> Result<Value, ParseError> {
        let mut sections = Map::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in raw_output.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                let heading = trimmed.trim_start_matches('#').trim();
                if !heading.is_empty() {
                    if let Some((title, body)) = current.take() {
                        sections.insert(title, Value::String(body.join("\n").trim().to_string()));
                    }
                    current = Some((heading.to_string(), Vec::new()));
                    continue;
                }
            }
            if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some((title, body)) = current {
            sections.insert(title, Value::String(body.join("\n").trim().to_string()));
        }

        if sections.is_empty() {
            return Err(ParseError::NoContent);
        }

        let mut root = Map::new();
        root.insert("sections".to_string(), Value::Object(sections));
        Ok(Value::Object(root))
    }
}

/// Per-analyzer parser lookup with an optional fallback
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn OutputParser>>,
    fallback: Option<Arc<dyn OutputParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markdown sections for every analyzer unless registered otherwise
    pub fn with_section_fallback() -> Self {
        Self {
            parsers: HashMap::new(),
            fallback: Some(Arc::new(SectionParser)),
        }
    }

    pub fn register(&mut self, analyzer: impl Into<String>, parser: Arc<dyn OutputParser>) {
        self.parsers.insert(analyzer.into(), parser);
    }

    pub fn for_analyzer(&self, analyzer: &str) -> Option<Arc<dyn OutputParser>> {
        self.parsers
            .get(analyzer)
            .cloned()
            .or_else(|| self.fallback.clone())
    }
}
