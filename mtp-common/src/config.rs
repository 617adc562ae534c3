//! Configuration loading and root folder resolution
//!
//! Bootstrap settings come from a TOML file. Every field has a built-in
//! default so an absent or partial file still yields a usable config.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`MTP_ROOT_FOLDER`, `MTP_LLM_API_KEY`, ...)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application directory name used under the platform config/data dirs
const APP_DIR: &str = "mtp";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the database and prompt templates
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite file name (relative paths resolve against the root folder)
    #[serde(default = "default_database_file")]
    pub database_file: PathBuf,

    /// Directory holding `<stage>/<analyzer>.txt` prompt templates
    /// (relative paths resolve against the root folder)
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            database_file: default_database_file(),
            prompts_dir: None,
            logging: LoggingConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full `EnvFilter` directive (e.g. `info`, `mtp_pipeline=debug`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Completion endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended)
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key; `MTP_LLM_API_KEY` overrides this value
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used when a job does not override it
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Completion token ceiling per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout; a timeout counts as a retryable failure
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Client-side request rate ceiling
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

/// Orchestration defaults; jobs may override concurrency and stop policy
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent analyzer calls per stage
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Completion attempts per analyzer (first call included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Stop starting new analyzers in a stage after the first error
    #[serde(default)]
    pub stop_on_error: bool,

    /// Token budget for the Stage A → Stage B context
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: i64,

    /// Token budget for the Stage A+B → Final context
    #[serde(default = "default_final_context_token_budget")]
    pub final_context_token_budget: i64,

    #[serde(default = "default_min_tokens_per_contributor")]
    pub min_tokens_per_contributor: usize,

    /// Token counting family: `heuristic`, `openai` or `anthropic`
    #[serde(default = "default_model_family")]
    pub model_family: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            stop_on_error: false,
            context_token_budget: default_context_token_budget(),
            final_context_token_budget: default_final_context_token_budget(),
            min_tokens_per_contributor: default_min_tokens_per_contributor(),
            model_family: default_model_family(),
        }
    }
}

fn default_port() -> u16 {
    5780
}

fn default_database_file() -> PathBuf {
    PathBuf::from("mtp.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_max_concurrency() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_context_token_budget() -> i64 {
    12_000
}

fn default_final_context_token_budget() -> i64 {
    16_000
}

fn default_min_tokens_per_contributor() -> usize {
    200
}

fn default_model_family() -> String {
    "heuristic".to_string()
}

impl TomlConfig {
    /// Parse a config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    /// Load from an explicit path, else the platform config file, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match locate_config_file() {
            Ok(path) => {
                tracing::info!(path = %path.display(), "Loading configuration file");
                Self::load(&path)
            }
            Err(_) => {
                tracing::debug!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Database path: absolute `database_file` wins, otherwise joined to the root folder
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        resolve_under(root_folder, &self.database_file)
    }

    /// Prompts directory, defaulting to `<root>/prompts`
    pub fn prompts_path(&self, root_folder: &Path) -> PathBuf {
        match &self.prompts_dir {
            Some(dir) => resolve_under(root_folder, dir),
            None => root_folder.join("prompts"),
        }
    }
}

fn resolve_under(root_folder: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root_folder.join(path)
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file `root_folder`
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config: Option<&TomlConfig>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root_folder) = config.and_then(|c| c.root_folder.clone()) {
        return root_folder;
    }

    // Priority 4: OS-dependent compiled default
    get_default_root_folder()
}

/// Find the platform configuration file
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./mtp_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 5780);
        assert_eq!(config.pipeline.max_concurrency, 3);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert!(!config.pipeline.stop_on_error);
        assert_eq!(config.logging.level, "info");
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 9000
            [pipeline]
            max_concurrency = 5
            stop_on_error = true
            [llm]
            default_model = "local-model"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.pipeline.max_concurrency, 5);
        assert!(config.pipeline.stop_on_error);
        assert_eq!(config.pipeline.context_token_budget, 12_000);
        assert_eq!(config.llm.default_model, "local-model");
        assert_eq!(config.llm.requests_per_minute, 60);
    }

    #[test]
    fn test_load_reports_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let err = TomlConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_database_path_resolution() {
        let root = Path::new("/srv/mtp");
        let mut config = TomlConfig::default();
        assert_eq!(config.database_path(root), PathBuf::from("/srv/mtp/mtp.db"));

        config.database_file = PathBuf::from("/var/db/jobs.db");
        assert_eq!(config.database_path(root), PathBuf::from("/var/db/jobs.db"));

        assert_eq!(config.prompts_path(root), PathBuf::from("/srv/mtp/prompts"));
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        let env_var = "MTP_TEST_ROOT_FOLDER";
        std::env::remove_var(env_var);

        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..TomlConfig::default()
        };

        assert_eq!(
            resolve_root_folder(Some("/from/cli"), env_var, Some(&config)),
            PathBuf::from("/from/cli")
        );

        std::env::set_var(env_var, "/from/env");
        assert_eq!(
            resolve_root_folder(None, env_var, Some(&config)),
            PathBuf::from("/from/env")
        );
        std::env::remove_var(env_var);

        assert_eq!(
            resolve_root_folder(None, env_var, Some(&config)),
            PathBuf::from("/from/toml")
        );

        assert!(resolve_root_folder(None, env_var, None).ends_with("mtp")
            || resolve_root_folder(None, env_var, None) == PathBuf::from("./mtp_data"));
    }
}
