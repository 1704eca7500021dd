//! TOML-based configuration for askdb.
//!
//! Values come from defaults, then an optional `askdb.toml`, then `ASKDB_*`
//! environment variables.
//!
//! Example configuration:
//! ```toml
//! log_level = "info"
//!
//! [ollama]
//! base_url = "http://localhost:11434"
//! model = "llama3.2:3b"
//! temperature = 0.0
//! max_tokens = 2000
//! request_timeout_secs = 300
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 1000
//! jitter = "full"
//!
//! [database]
//! path = "./shop.db"
//! read_only = true
//!
//! [prompt]
//! include_examples = true
//! custom_instructions = "Amounts are stored in cents."
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::connectors::ConnectionConfig;
use crate::llm::backend::{Jitter, RetryPolicy};
use crate::llm::prompt::PromptOptions;
use crate::ollama::OllamaSettings;
use crate::pipeline::PipelineConfig;

const DEFAULT_CONFIG_FILE: &str = "askdb.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub ollama: OllamaSettings,
    pub retry: RetrySettings,
    pub database: DatabaseSettings,
    pub prompt: PromptOptions,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama: OllamaSettings::default(),
            retry: RetrySettings::default(),
            database: DatabaseSettings::default(),
            prompt: PromptOptions::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Backoff for transient backend failures.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter: Jitter,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            jitter: Jitter::Full,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            jitter: self.jitter,
        }
    }
}

/// SQLite database the questions run against.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// File path, or `:memory:`.
    pub path: String,
    pub read_only: bool,
    /// SQL scripts run once after opening, in order.
    pub init_sql: Vec<PathBuf>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            read_only: false,
            init_sql: Vec::new(),
        }
    }
}

impl DatabaseSettings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            file_path: self.path.clone(),
            read_only: self.read_only,
        }
    }
}

impl Settings {
    /// Load settings from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from `path`, or `./askdb.toml` if present, or defaults; then
    /// apply `ASKDB_*` overrides from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(&local)?
                } else {
                    Settings::default()
                }
            }
        };
        settings.apply_env_from(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ASKDB_OLLAMA_URL") {
            self.ollama.base_url = v;
        }
        if let Some(v) = lookup("ASKDB_MODEL") {
            self.ollama.model = v;
        }
        if let Some(v) = lookup("ASKDB_TEMPERATURE") {
            self.ollama.temperature = parse_env("ASKDB_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("ASKDB_MAX_TOKENS") {
            self.ollama.max_tokens = parse_env("ASKDB_MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("ASKDB_REQUEST_TIMEOUT_SECS") {
            self.ollama.request_timeout_secs = parse_env("ASKDB_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("ASKDB_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("ASKDB_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("ASKDB_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("ASKDB_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("ASKDB_DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("ASKDB_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    /// Orchestrator settings derived from this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            prompt: self.prompt.clone(),
            retry: self.retry.policy(),
            request_timeout: (self.ollama.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.ollama.request_timeout_secs)),
        }
    }
}

fn parse_env<T: FromStr>(var: &str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}
