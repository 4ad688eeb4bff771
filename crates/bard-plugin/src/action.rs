//! Actions and session state exchanged between plugins, roles and the executor

use serde::{Deserialize, Serialize};

/// Maximum number of authored choices kept from a proposer draft
pub const MAX_AUTHORED_CHOICES: usize = 6;

/// Which parsing strategy produced an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseProvenance {
    /// Embedded JSON object with an explicit choice index
    Structured,
    /// First standalone integer in the raw text
    IntegerScan,
    /// Nothing usable; first available action
    Default,
}

impl ParseProvenance {
    /// Stable label for metrics and event payloads
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::IntegerScan => "integer_scan",
            Self::Default => "default",
        }
    }
}

/// Outcome of validating proposer-authored content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthoredStatus {
    /// Passed shape checks and travels with the action
    Accepted,
    /// Failed shape checks and was dropped
    Rejected,
}

/// Narrative continuation drafted by a proposer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoredContent {
    /// Prose for the next beat
    pub passage: String,
    /// Choice texts offered after the beat
    pub choices: Vec<String>,
}

impl AuthoredContent {
    /// Trim, drop empty choices and cap the list. `None` when the passage is
    /// blank or no choice survives.
    #[must_use]
    pub fn validated(self) -> Option<Self> {
        let passage = self.passage.trim().to_string();
        let choices: Vec<String> = self
            .choices
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .take(MAX_AUTHORED_CHOICES)
            .collect();
        (!passage.is_empty() && !choices.is_empty()).then_some(Self { passage, choices })
    }
}

/// Observability data attached by the role layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    /// Parsing strategy that fired
    pub provenance: Option<ParseProvenance>,
    /// Model reasoning, when supplied
    pub reasoning: Option<String>,
    /// Validation result for authored content, when any was supplied
    pub authored: Option<AuthoredStatus>,
}

/// One legal next move in a story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Zero-based position in the available list
    pub index: usize,
    /// Choice text shown to the actor
    pub label: String,
    /// Backend-specific destination (passage name for hypertext)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Proposer draft that accompanies the choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored: Option<AuthoredContent>,
    /// Role-layer metadata
    #[serde(default)]
    pub metadata: ActionMetadata,
}

impl Action {
    /// Plain choice with no target
    pub fn choice(index: usize, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            target: None,
            authored: None,
            metadata: ActionMetadata::default(),
        }
    }

    /// With a backend destination
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// One applied step, kept for prompt history and resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Scene the choice was made in
    pub scene_id: String,
    /// Scene text at that point
    pub scene_text: String,
    /// Choice taken
    pub choice: String,
}

/// Plugin-owned view of where the narrative is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Current scene or passage id
    pub scene_id: String,
    /// Current scene text
    pub scene_text: String,
    /// Labels of the available choices
    pub choices: Vec<String>,
    /// Actions applied so far
    pub action_count: u32,
    /// Backend reported completion
    pub complete: bool,
    /// Applied steps, oldest first
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Backend-specific resume data
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub plugin_state: serde_json::Value,
}

/// Result of `execute_headless`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    /// Backend accepted the action
    pub success: bool,
    /// State after the call; unchanged on failure
    pub state: SessionSnapshot,
    /// Backend considers the story finished
    pub complete: bool,
    /// Failure description
    pub error: Option<String>,
}

impl ExecuteOutcome {
    /// Successful application
    #[must_use]
    pub fn applied(state: SessionSnapshot) -> Self {
        let complete = state.complete;
        Self {
            success: true,
            state,
            complete,
            error: None,
        }
    }

    /// Failed application; `state` must be the pre-call state
    #[must_use]
    pub fn failed(state: SessionSnapshot, error: impl Into<String>) -> Self {
        let complete = state.complete;
        Self {
            success: false,
            state,
            complete,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authored_content_is_trimmed_and_capped() {
        let content = AuthoredContent {
            passage: "  The lantern flickers.  ".into(),
            choices: (0..9).map(|i| format!(" choice {i} ")).chain([String::new()]).collect(),
        };
        let valid = content.validated().unwrap();
        assert_eq!(valid.passage, "The lantern flickers.");
        assert_eq!(valid.choices.len(), MAX_AUTHORED_CHOICES);
        assert_eq!(valid.choices[0], "choice 0");
    }

    #[test]
    fn authored_content_requires_prose_and_a_choice() {
        let blank = AuthoredContent {
            passage: "   ".into(),
            choices: vec!["Go".into()],
        };
        assert!(blank.validated().is_none());
        let no_choices = AuthoredContent {
            passage: "Rain.".into(),
            choices: vec!["  ".into()],
        };
        assert!(no_choices.validated().is_none());
    }

    #[test]
    fn failed_outcome_keeps_completion_flag_of_prior_state() {
        let state = SessionSnapshot {
            scene_id: "Start".into(),
            ..SessionSnapshot::default()
        };
        let outcome = ExecuteOutcome::failed(state.clone(), "service unavailable");
        assert!(!outcome.success);
        assert!(!outcome.complete);
        assert_eq!(outcome.state, state);
    }
}
