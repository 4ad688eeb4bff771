//! Generative story backend
//!
//! The story engine runs behind a session service with two operations:
//! create a session from a template, and advance it with a choice. Sessions
//! are not resumable; a recovered participant starts over.

use crate::action::{Action, AuthoredContent, ExecuteOutcome, HistoryEntry, SessionSnapshot};
use crate::error::PluginError;
use crate::{PluginContext, ResumePolicy, StoryPlugin};
use async_trait::async_trait;
use bard_core::{ParticipantId, PluginKind, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Option key naming the story template
pub const TEMPLATE_ID_OPTION: &str = "templateId";

/// Session-create request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    /// Story template
    pub template_id: String,
    /// Actor
    pub participant_id: ParticipantId,
    /// Actor role
    pub role: Role,
    /// Planned number of turns
    pub max_turns: u32,
}

/// Session-advance request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceSession {
    /// Chosen index
    pub choice_index: usize,
    /// Chosen text
    pub choice_text: String,
    /// Proposer draft for the engine to continue from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored: Option<AuthoredContent>,
}

/// Story service response for both operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryTurn {
    /// Service-side session id
    pub session_id: String,
    /// Scene id
    pub scene_id: String,
    /// Scene text
    pub text: String,
    /// Choices offered next
    #[serde(default)]
    pub choices: Vec<String>,
    /// Story finished
    #[serde(default)]
    pub complete: bool,
}

/// Session-create and session-advance operations of a story service
#[async_trait]
pub trait StoryService: Send + Sync {
    /// Start a session
    async fn create_session(&self, request: &CreateSession) -> Result<StoryTurn, PluginError>;

    /// Apply a choice
    async fn advance(
        &self,
        session_id: &str,
        request: &AdvanceSession,
    ) -> Result<StoryTurn, PluginError>;
}

/// Story service reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpStoryService {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpStoryService {
    /// Client for a service rooted at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<StoryTurn, String> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("story service returned {status}: {body}"));
        }
        response.json::<StoryTurn>().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl StoryService for HttpStoryService {
    async fn create_session(&self, request: &CreateSession) -> Result<StoryTurn, PluginError> {
        self.post("/sessions", request)
            .await
            .map_err(PluginError::Initialization)
    }

    async fn advance(
        &self,
        session_id: &str,
        request: &AdvanceSession,
    ) -> Result<StoryTurn, PluginError> {
        self.post(&format!("/sessions/{session_id}/advance"), request)
            .await
            .map_err(PluginError::Backend)
    }
}

/// Generative backend over a [`StoryService`]
pub struct DynamicStoryPlugin {
    service: Arc<dyn StoryService>,
    turn: Option<StoryTurn>,
    action_count: u32,
    history: Vec<HistoryEntry>,
}

impl std::fmt::Debug for DynamicStoryPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicStoryPlugin")
            .field("turn", &self.turn)
            .field("action_count", &self.action_count)
            .finish_non_exhaustive()
    }
}

impl DynamicStoryPlugin {
    /// Plugin talking to `service`
    #[must_use]
    pub fn new(service: Arc<dyn StoryService>) -> Self {
        Self {
            service,
            turn: None,
            action_count: 0,
            history: Vec::new(),
        }
    }
}

#[async_trait]
impl StoryPlugin for DynamicStoryPlugin {
    fn kind(&self) -> PluginKind {
        PluginKind::DynamicStory
    }

    async fn init_headless(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        let template_id = context
            .task_config
            .option_str(TEMPLATE_ID_OPTION)
            .ok_or_else(|| {
                PluginError::Initialization(format!("missing '{TEMPLATE_ID_OPTION}' option"))
            })?
            .to_string();
        let request = CreateSession {
            template_id,
            participant_id: context.participant_id,
            role: context.role,
            max_turns: context.task_config.max_actions,
        };
        let turn = self.service.create_session(&request).await.map_err(|e| match e {
            PluginError::Initialization(_) => e,
            other => PluginError::Initialization(other.to_string()),
        })?;
        tracing::debug!(
            participant_id = %context.participant_id,
            session_id = %turn.session_id,
            template_id = %request.template_id,
            "dynamic story session created"
        );
        self.turn = Some(turn);
        self.action_count = 0;
        self.history.clear();
        Ok(())
    }

    fn available_actions(&self) -> Vec<Action> {
        match &self.turn {
            Some(turn) if !turn.complete => turn
                .choices
                .iter()
                .enumerate()
                .map(|(i, c)| Action::choice(i, c.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn execute_headless(&mut self, action: &Action) -> ExecuteOutcome {
        let before = self.snapshot();
        let Some(turn) = &self.turn else {
            return ExecuteOutcome::failed(before, PluginError::NotInitialized.to_string());
        };
        if action.index >= turn.choices.len() {
            let error = PluginError::InvalidAction {
                index: action.index,
                reason: format!("{} choices available", turn.choices.len()),
            };
            return ExecuteOutcome::failed(before, error.to_string());
        }
        let session_id = turn.session_id.clone();
        let request = AdvanceSession {
            choice_index: action.index,
            choice_text: turn.choices[action.index].clone(),
            authored: action.authored.clone(),
        };
        match self.service.advance(&session_id, &request).await {
            Ok(next) => {
                self.history.push(HistoryEntry {
                    scene_id: before.scene_id,
                    scene_text: before.scene_text,
                    choice: request.choice_text,
                });
                self.turn = Some(next);
                self.action_count += 1;
                ExecuteOutcome::applied(self.snapshot())
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "story service advance failed");
                ExecuteOutcome::failed(before, e.to_string())
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.turn.as_ref().is_some_and(|t| t.complete)
    }

    fn snapshot(&self) -> SessionSnapshot {
        let Some(turn) = &self.turn else {
            return SessionSnapshot::default();
        };
        SessionSnapshot {
            scene_id: turn.scene_id.clone(),
            scene_text: turn.text.clone(),
            choices: if turn.complete { Vec::new() } else { turn.choices.clone() },
            action_count: self.action_count,
            complete: turn.complete,
            history: self.history.clone(),
            plugin_state: serde_json::json!({ "sessionId": turn.session_id }),
        }
    }

    fn resume_policy(&self) -> ResumePolicy {
        ResumePolicy::Restart
    }
}
