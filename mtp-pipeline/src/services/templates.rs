//! Prompt template registry and rendering
//!
//! Templates live at `<prompts_dir>/<stage>/<analyzer>.txt` (or `.md`),
//! where `<stage>` is any spelling [`Stage::normalize`] accepts. Bodies use
//! `{{transcript}}` and `{{context}}` placeholders.

use mtp_common::Stage;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use crate::models::{AnalyzerSpec, PromptVariables, StageInput, StageSpec};

const TRANSCRIPT_VAR: &str = "transcript";
const CONTEXT_VAR: &str = "context";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Unknown analyzer '{analyzer}' for stage {stage}")]
    UnknownAnalyzer { stage: Stage, analyzer: String },

    #[error("Template '{template}' not found")]
    TemplateNotFound { template: String },

    #[error("Template '{template}' requires variable '{variable}' which was not provided")]
    MissingVariable { template: String, variable: String },

    #[error("Failed to load templates from {path}: {message}")]
    Load { path: String, message: String },
}

/// Renders a template reference against prompt variables
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_ref: &str, variables: &PromptVariables) -> Result<String, TemplateError>;
}

/// In-memory set of analyzer templates grouped by stage
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
    stages: BTreeMap<Stage, Vec<String>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference under which a stage's analyzer template is stored
    pub fn template_ref(stage: Stage, analyzer: &str) -> String {
        format!("{}/{}", stage.as_str(), analyzer)
    }

    /// Add or replace one analyzer template
    pub fn insert(&mut self, stage: Stage, analyzer: &str, body: impl Into<String>) {
        let names = self.stages.entry(stage).or_default();
        if !names.iter().any(|n| n == analyzer) {
            names.push(analyzer.to_string());
            names.sort();
        }
        self.templates
            .insert(Self::template_ref(stage, analyzer), body.into());
    }

    /// Load every `<stage>/<analyzer>.{txt,md}` file under `dir`
    ///
    /// Directories that are not a recognizable stage are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self, TemplateError> {
        let load_err = |e: std::io::Error| TemplateError::Load {
            path: dir.display().to_string(),
            message: e.to_string(),
        };

        let mut registry = Self::new();
        for entry in std::fs::read_dir(dir).map_err(load_err)? {
            let entry = entry.map_err(load_err)?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().to_string();
            let Some(stage) = Stage::normalize(&dir_name) else {
                tracing::warn!(directory = %path.display(), "Skipping non-stage prompt directory");
                continue;
            };

            for file in std::fs::read_dir(&path).map_err(load_err)? {
                let file_path = file.map_err(load_err)?.path();
                let is_template = matches!(
                    file_path.extension().and_then(|e| e.to_str()),
                    Some("txt") | Some("md")
                );
                if !is_template {
                    continue;
                }
                let Some(analyzer) = file_path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                let body = std::fs::read_to_string(&file_path).map_err(load_err)?;
                registry.insert(stage, analyzer, body);
            }
        }

        tracing::info!(
            path = %dir.display(),
            stage_a = registry.analyzers(Stage::StageA).len(),
            stage_b = registry.analyzers(Stage::StageB).len(),
            final_stage = registry.analyzers(Stage::Final).len(),
            "Prompt templates loaded"
        );
        Ok(registry)
    }

    /// Generic prompts used when no prompts directory is present
    pub fn with_builtin_defaults() -> Self {
        let mut registry = Self::new();
        for (analyzer, focus) in [
            ("say_means", "what each speaker said and what they actually meant"),
            ("perspective", "the distinct perspectives held by participants"),
            ("premises", "the premises and assumptions underlying the discussion"),
            ("postulate", "claims participants put forward as settled"),
        ] {
            registry.insert(
                Stage::StageA,
                analyzer,
                format!(
                    "Analyze the meeting transcript below and describe {}.\n\nTranscript:\n{{{{transcript}}}}",
                    focus
                ),
            );
        }
        registry.insert(
            Stage::StageB,
            "synthesis",
            "Using the analyses below, identify agreements, tensions and open questions.\n\n{{context}}",
        );
        registry.insert(
            Stage::Final,
            "meeting_report",
            "Write a meeting report with decisions, action items and risks based on the analyses below.\n\n{{context}}",
        );
        registry
    }

    /// Analyzer names available for a stage, sorted
    pub fn analyzers(&self, stage: Stage) -> &[String] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, stage: Stage, analyzer: &str) -> bool {
        self.templates
            .contains_key(&Self::template_ref(stage, analyzer))
    }

    /// Resolve a run's ordered selection into a stage spec
    pub fn stage_spec(&self, stage: Stage, names: &[String]) -> Result<StageSpec, TemplateError> {
        let analyzers = names
            .iter()
            .map(|name| {
                if self.contains(stage, name) {
                    Ok(AnalyzerSpec {
                        name: name.clone(),
                        template_ref: Self::template_ref(stage, name),
                    })
                } else {
                    Err(TemplateError::UnknownAnalyzer {
                        stage,
                        analyzer: name.clone(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StageSpec {
            stage,
            input: StageInput::for_stage(stage),
            analyzers,
        })
    }
}

impl TemplateRenderer for TemplateRegistry {
    fn render(&self, template_ref: &str, variables: &PromptVariables) -> Result<String, TemplateError> {
        let body = self
            .templates
            .get(template_ref)
            .ok_or_else(|| TemplateError::TemplateNotFound {
                template: template_ref.to_string(),
            })?;

        let variables = [
            (TRANSCRIPT_VAR, variables.transcript.as_deref(), "Transcript"),
            (CONTEXT_VAR, variables.context.as_deref(), "Context"),
        ];
        let placeholders: Vec<[String; 2]> = variables
            .iter()
            .map(|(name, _, _)| [format!("{{{{{}}}}}", name), format!("{{{{ {} }}}}", name)])
            .collect();

        // Decided against the template body alone; inserted values are never rescanned
        let referenced: Vec<bool> = placeholders
            .iter()
            .map(|forms| forms.iter().any(|p| body.contains(p.as_str())))
            .collect();

        for ((name, value, _), referenced) in variables.iter().zip(&referenced) {
            if *referenced && value.is_none() {
                return Err(TemplateError::MissingVariable {
                    template: template_ref.to_string(),
                    variable: name.to_string(),
                });
            }
        }

        let mut rendered = String::with_capacity(body.len());
        let mut rest = body.as_str();
        'scan: while let Some(ch) = rest.chars().next() {
            for ((_, value, _), forms) in variables.iter().zip(&placeholders) {
                if let Some(value) = value {
                    if let Some(form) = forms.iter().find(|p| rest.starts_with(p.as_str())) {
                        rendered.push_str(value);
                        rest = &rest[form.len()..];
                        continue 'scan;
                    }
                }
            }
            rendered.push(ch);
            rest = &rest[ch.len_utf8()..];
        }

        // Provided but not referenced: append so inclusion toggles work with any template
        for ((_, value, heading), referenced) in variables.iter().zip(&referenced) {
            if let (false, Some(value)) = (*referenced, value) {
                rendered.push_str(&format!("\n\n{}:\n{}", heading, value));
            }
        }

        Ok(rendered)
    }
}
