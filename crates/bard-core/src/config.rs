//! Runner configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! `BARD_*` environment variables override selected fields.

use crate::error::ConfigError;
use crate::types::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level runner configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Job queue and worker pool
    pub queue: QueueSettings,
    /// Session executor
    pub executor: ExecutorSettings,
    /// LLM gateway endpoints and credentials
    pub llm: LlmSettings,
    /// Log output
    pub logging: LoggingSettings,
}

impl RunnerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Toml` on syntax or schema errors.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if unreadable, `ConfigError::Toml` if malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `BARD_WORKERS`, `BARD_LOG` and `BARD_LOG_FORMAT` from the process environment
    ///
    /// # Errors
    /// `ConfigError::Env` when a variable is set but unparsable.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (tests inject a map)
    ///
    /// # Errors
    /// `ConfigError::Env` when a value is unparsable.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("BARD_WORKERS") {
            self.queue.workers = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "BARD_WORKERS".into(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("BARD_LOG") {
            self.logging.filter = value;
        }
        if let Some(value) = lookup("BARD_LOG_FORMAT") {
            self.logging.format = match value.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::Env {
                        var: "BARD_LOG_FORMAT".into(),
                        value,
                    })
                }
            };
        }
        Ok(self)
    }

    /// With worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.queue.workers = workers;
        self
    }

    /// With the retry policy applied to session-execution jobs
    #[inline]
    #[must_use]
    pub fn with_execute_retry(mut self, policy: RetryPolicy) -> Self {
        self.queue.execute_retry = policy;
        self
    }
}

/// Job queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Concurrent session-execution workers
    pub workers: usize,
    /// Retry policy for batch-creation jobs
    pub create_retry: RetryPolicy,
    /// Retry policy for session-execution jobs
    pub execute_retry: RetryPolicy,
    /// How long an idle worker waits before polling delayed jobs again
    pub poll_interval_ms: u64,
    /// Where queue snapshots are written, if anywhere
    pub snapshot_path: Option<PathBuf>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            create_retry: RetryPolicy {
                base_delay_ms: 1_000,
                ..RetryPolicy::default()
            },
            execute_retry: RetryPolicy::default(),
            poll_interval_ms: 250,
            snapshot_path: None,
        }
    }
}

impl QueueSettings {
    /// Poll interval as a duration
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Attempts for one `execute_headless` call before the participant is excluded
    pub apply_attempts: u32,
    /// Pause between apply attempts
    pub apply_retry_delay_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            apply_attempts: 3,
            apply_retry_delay_ms: 500,
        }
    }
}

impl ExecutorSettings {
    /// Apply retry delay as a duration
    #[inline]
    #[must_use]
    pub fn apply_retry_delay(&self) -> Duration {
        Duration::from_millis(self.apply_retry_delay_ms)
    }
}

/// LLM gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI API base
    pub openai_base_url: String,
    /// Ollama base (OpenAI-compatible endpoint)
    pub ollama_base_url: String,
    /// Anthropic API base
    pub anthropic_base_url: String,
    /// Environment variable holding the OpenAI key
    pub openai_api_key_env: String,
    /// Environment variable holding the Anthropic key
    pub anthropic_api_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".into(),
            ollama_base_url: "http://localhost:11434/v1".into(),
            anthropic_base_url: "https://api.anthropic.com/v1".into(),
            openai_api_key_env: "OPENAI_API_KEY".into(),
            anthropic_api_key_env: "ANTHROPIC_API_KEY".into(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Backoff;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = RunnerConfig::from_toml_str("").unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert_eq!(config.queue.execute_retry.max_attempts, 3);
        assert_eq!(config.executor.apply_attempts, 3);
    }

    #[test]
    fn partial_toml_overrides_selected_fields() {
        let config = RunnerConfig::from_toml_str(
            r#"
            [queue]
            workers = 16

            [queue.execute_retry]
            max_attempts = 5
            backoff = "fixed"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.workers, 16);
        assert_eq!(config.queue.execute_retry.max_attempts, 5);
        assert_eq!(config.queue.execute_retry.backoff, Backoff::Fixed);
        assert_eq!(config.queue.execute_retry.base_delay_ms, 2_000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[executor]\napply_attempts = 7").unwrap();
        let config = RunnerConfig::load(file.path()).unwrap();
        assert_eq!(config.executor.apply_attempts, 7);

        let missing = RunnerConfig::load("/definitely/not/here.toml");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("BARD_WORKERS", "2"), ("BARD_LOG", "bard=debug")]);
        let config = RunnerConfig::new()
            .with_overrides_from(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.logging.filter, "bard=debug");

        let bad = RunnerConfig::new().with_overrides_from(|k| {
            (k == "BARD_WORKERS").then(|| "many".to_string())
        });
        assert!(matches!(bad, Err(ConfigError::Env { .. })));
    }
}
