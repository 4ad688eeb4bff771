//! Core value types for Silent Bard
//!
//! Defines the identifiers and configuration values shared by every layer:
//! - Batch, participant and event identifiers
//! - LLM configuration (provider, model, sampling, limits)
//! - Task configuration exposed to batch creators
//! - Typed retry policies handed to the job queue

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use ulid::Ulid;
use uuid::Uuid;

/// Unique batch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Generate new batch ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Generate new participant ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique event identifier (ULID, so ids sort by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Ulid);

impl EventId {
    /// Generate new event ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Study reference. Studies are owned by the setup tooling, so this is an opaque key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyId(pub String);

impl StudyId {
    /// Create a study id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role a synthetic actor plays in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Follows existing choices
    Navigator,
    /// Drafts the next story beat (and, in team mode, revises it)
    Proposer,
    /// Reviews a proposer draft; never commits actions itself
    Critic,
}

impl Role {
    /// Stable lowercase name, used in metrics labels and prompts
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Navigator => "navigator",
            Role::Proposer => "proposer",
            Role::Critic => "critic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Story backend identifier. The set is closed; the plugin registry maps each
/// kind to a factory at job-construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Static hypertext (Twine-style passages and links)
    Twine,
    /// Generative story engine behind a session service
    DynamicStory,
}

impl PluginKind {
    /// Stable identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Twine => "twine",
            PluginKind::DynamicStory => "dynamic_story",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "twine" => Ok(PluginKind::Twine),
            "dynamic_story" | "dynamicstory" => Ok(PluginKind::DynamicStory),
            other => Err(CoreError::InvalidConfig(format!("unknown plugin type '{other}'"))),
        }
    }
}

/// LLM provider behind the chat gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI chat completions
    OpenAi,
    /// Local Ollama (OpenAI-compatible endpoint)
    Ollama,
    /// Anthropic messages API
    Anthropic,
}

/// LLM configuration for one actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Provider
    pub provider: Provider,
    /// Model identifier as the provider knows it
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token limit
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in milliseconds
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_llm_timeout_ms() -> u64 {
    60_000
}

impl LlmConfig {
    /// Create a config with default sampling parameters
    #[must_use]
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_llm_timeout_ms(),
        }
    }

    /// With temperature
    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Request timeout as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Task configuration exposed to batch creators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Story backend
    pub plugin_type: PluginKind,
    /// Action budget; reaching it counts as normal completion
    pub max_actions: u32,
    /// Per-action selection timeout in milliseconds
    pub timeout_ms: u64,
    /// Proposer + critic collaboration
    #[serde(default)]
    pub team_mode: bool,
    /// Critic model; team rounds without one are accepted unreviewed
    #[serde(default)]
    pub critic_llm_config: Option<LlmConfig>,
    /// Ask the proposer for a revision after a critique
    #[serde(default = "default_true")]
    pub revise_after_critique: bool,
    /// Pair consecutive participants as partners
    #[serde(default)]
    pub pair_participants: bool,
    /// Number of recent turns included in prompts
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Backend-specific options (story id, template id, ...)
    #[serde(default)]
    pub plugin_options: serde_json::Value,
}

fn default_true() -> bool {
    true
}

fn default_history_window() -> usize {
    5
}

impl TaskConfig {
    /// Create a task config for a plugin with the given budget
    #[must_use]
    pub fn new(plugin_type: PluginKind, max_actions: u32, timeout_ms: u64) -> Self {
        Self {
            plugin_type,
            max_actions,
            timeout_ms,
            team_mode: false,
            critic_llm_config: None,
            revise_after_critique: true,
            pair_participants: false,
            history_window: default_history_window(),
            plugin_options: serde_json::Value::Null,
        }
    }

    /// Enable team mode with an optional critic
    #[must_use]
    pub fn with_team(mut self, critic: Option<LlmConfig>) -> Self {
        self.team_mode = true;
        self.critic_llm_config = critic;
        self
    }

    /// Pair consecutive participants of the batch
    #[inline]
    #[must_use]
    pub fn with_pairing(mut self) -> Self {
        self.pair_participants = true;
        self
    }

    /// With backend-specific options
    #[must_use]
    pub fn with_plugin_options(mut self, options: serde_json::Value) -> Self {
        self.plugin_options = options;
        self
    }

    /// Per-action timeout as a duration
    #[inline]
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Look up a string option
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.plugin_options.get(key).and_then(serde_json::Value::as_str)
    }

    /// Reject configurations the executor cannot run
    ///
    /// # Errors
    /// `CoreError::InvalidConfig` when the budget or timeout is zero, or a
    /// critic or pairing is configured outside team mode.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_actions == 0 {
            return Err(CoreError::InvalidConfig("maxActions must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(CoreError::InvalidConfig("timeoutMs must be positive".into()));
        }
        if !self.team_mode && self.critic_llm_config.is_some() {
            return Err(CoreError::InvalidConfig(
                "criticLlmConfig requires teamMode".into(),
            ));
        }
        if !self.team_mode && self.pair_participants {
            return Err(CoreError::InvalidConfig(
                "pairParticipants requires teamMode".into(),
            ));
        }
        Ok(())
    }
}

/// Backoff shape between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay every time
    Fixed,
    /// Delay doubles after each failed attempt
    Exponential,
}

/// Typed retry policy passed to the queue at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Backoff shape
    pub backoff: Backoff,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential policy
    #[must_use]
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential,
            base_delay_ms: u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Fixed-delay policy
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed,
            base_delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    #[inline]
    #[must_use]
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Delay before the next attempt, given how many attempts already failed (>= 1)
    #[must_use]
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(32);
        let millis = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => self.base_delay_ms.saturating_mul(1u64 << exponent),
        };
        Duration::from_millis(millis.min(self.max_delay_ms.max(self.base_delay_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plugin_kind_parses_loose_spellings() {
        assert_eq!("twine".parse::<PluginKind>().unwrap(), PluginKind::Twine);
        assert_eq!(
            "Dynamic-Story".parse::<PluginKind>().unwrap(),
            PluginKind::DynamicStory
        );
        assert!("ink".parse::<PluginKind>().is_err());
    }

    #[test]
    fn task_config_uses_camel_case_schema() {
        let json = serde_json::json!({
            "pluginType": "twine",
            "maxActions": 10,
            "timeoutMs": 30000,
            "teamMode": true,
            "criticLlmConfig": { "provider": "ollama", "model": "gemma3:27b" }
        });
        let config: TaskConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.plugin_type, PluginKind::Twine);
        assert!(config.team_mode);
        assert!(config.revise_after_critique);
        assert_eq!(config.history_window, 5);
        assert_eq!(config.critic_llm_config.unwrap().max_tokens, 1024);
    }

    #[test]
    fn task_config_validation() {
        assert!(TaskConfig::new(PluginKind::Twine, 0, 1000).validate().is_err());
        assert!(TaskConfig::new(PluginKind::Twine, 5, 0).validate().is_err());

        let mut config = TaskConfig::new(PluginKind::Twine, 5, 1000);
        config.critic_llm_config = Some(LlmConfig::new(Provider::Ollama, "llama3.2:3b"));
        assert!(config.validate().is_err());
        assert!(config.with_team(None).validate().is_ok());

        let paired = TaskConfig::new(PluginKind::Twine, 5, 1000).with_pairing();
        assert!(paired.validate().is_err());
        assert!(paired.with_team(None).validate().is_ok());
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Backoff::Exponential,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }

    #[test]
    fn no_retry_policy_allows_single_attempt() {
        let policy = RetryPolicy::no_retry();
        assert!(policy.allows_retry(0));
        assert!(!policy.allows_retry(1));
    }

    proptest! {
        #[test]
        fn backoff_never_exceeds_cap(attempt in 0u32..200, base in 1u64..10_000, cap in 1u64..100_000) {
            let policy = RetryPolicy {
                max_attempts: 3,
                backoff: Backoff::Exponential,
                base_delay_ms: base,
                max_delay_ms: cap,
            };
            let delay = policy.delay_for(attempt);
            prop_assert!(delay <= Duration::from_millis(cap.max(base)));
        }
    }
}
