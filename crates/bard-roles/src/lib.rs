//! Silent Bard role adapters
//!
//! An adapter turns plugin state into a prompt and a model reply back into
//! one of the plugin's available actions. Parsing is total: malformed replies
//! resolve through the fallback chain in [`parse`], with the strategy that
//! fired recorded on the returned action.
//!
//! - [`Navigator`] picks among existing choices
//! - [`Proposer`] also drafts the next beat (validated authored content)
//! - [`Critic`] reviews a proposer draft and returns a [`Critique`]

#![warn(unreachable_pub)]

pub mod critic;
pub mod navigator;
pub mod parse;
pub mod proposer;
mod render;

pub use critic::{Critic, Critique, Ratings};
pub use navigator::Navigator;
pub use parse::{extract_json_object, first_standalone_integer, parse_choice, ParsedChoice};
pub use proposer::Proposer;

use bard_core::{PluginKind, Role, TaskConfig};
use bard_llm::ChatMessage;
use bard_plugin::{Action, HistoryEntry, SessionSnapshot};

/// Role-layer failures. Choice parsing itself never fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoleError {
    /// No available actions to choose from
    #[error("no available actions")]
    NoActions,

    /// Critic reply had no usable structure
    #[error("malformed critique: {0}")]
    MalformedCritique(String),
}

/// System and user prompt pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Instructions
    pub system: String,
    /// Situation and request
    pub user: String,
}

impl Prompt {
    /// Chat messages in gateway order
    #[must_use]
    pub fn into_messages(self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system), ChatMessage::user(self.user)]
    }
}

/// Everything an adapter sees about the current turn
#[derive(Debug, Clone, PartialEq)]
pub struct RoleContext {
    /// Current scene id
    pub scene_id: String,
    /// Current scene text
    pub scene_text: String,
    /// Most recent turns, oldest first, bounded by the history window
    pub history: Vec<HistoryEntry>,
    /// Available actions, index-aligned
    pub actions: Vec<Action>,
    /// 1-based number of the action being chosen
    pub action_number: u32,
    /// Action budget
    pub max_actions: u32,
    /// Backend accepts authored continuations
    pub authoring: bool,
    /// Proposer draft under review or revision
    pub draft: Option<Action>,
    /// Critique to address in a revision
    pub critique: Option<Critique>,
}

impl RoleContext {
    /// Context for the next action from a plugin snapshot
    #[must_use]
    pub fn new(snapshot: &SessionSnapshot, actions: Vec<Action>, task: &TaskConfig) -> Self {
        let skip = snapshot.history.len().saturating_sub(task.history_window);
        Self {
            scene_id: snapshot.scene_id.clone(),
            scene_text: snapshot.scene_text.clone(),
            history: snapshot.history[skip..].to_vec(),
            actions,
            action_number: snapshot.action_count + 1,
            max_actions: task.max_actions,
            authoring: task.plugin_type == PluginKind::DynamicStory,
            draft: None,
            critique: None,
        }
    }

    /// With a draft to review or revise
    #[inline]
    #[must_use]
    pub fn with_draft(mut self, draft: Action) -> Self {
        self.draft = Some(draft);
        self
    }

    /// With a critique to address
    #[inline]
    #[must_use]
    pub fn with_critique(mut self, critique: Critique) -> Self {
        self.critique = Some(critique);
        self
    }
}

/// Prompt building and reply parsing for one action-producing role
pub trait RoleAdapter: Send + Sync {
    /// Role served
    fn role(&self) -> Role;

    /// Deterministic prompt for the context
    fn build_prompt(&self, context: &RoleContext) -> Prompt;

    /// Resolve a reply into one of `context.actions`
    ///
    /// # Errors
    /// Only `RoleError::NoActions`, when the context has no actions.
    fn parse_response(&self, output: &str, context: &RoleContext) -> Result<Action, RoleError>;
}

/// Adapter for a participant role; critics do not produce actions
#[must_use]
pub fn adapter_for(role: Role) -> Option<Box<dyn RoleAdapter>> {
    match role {
        Role::Navigator => Some(Box::new(Navigator)),
        Role::Proposer => Some(Box::new(Proposer)),
        Role::Critic => None,
    }
}

/// Parse a choice and stamp provenance and reasoning onto the chosen action
fn choose(
    role: Role,
    output: &str,
    context: &RoleContext,
) -> Result<(Action, ParsedChoice), RoleError> {
    if context.actions.is_empty() {
        return Err(RoleError::NoActions);
    }
    let parsed = parse_choice(output, context.actions.len());
    parse::record_provenance(role, parsed.provenance);
    let mut action = context.actions[parsed.index].clone();
    action.metadata.provenance = Some(parsed.provenance);
    action.metadata.reasoning.clone_from(&parsed.reasoning);
    Ok((action, parsed))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn context(labels: &[&str]) -> RoleContext {
        let snapshot = SessionSnapshot {
            scene_id: "Gate".into(),
            scene_text: "A jade dragon guards the gate.".into(),
            choices: labels.iter().map(|l| (*l).to_string()).collect(),
            action_count: 2,
            history: (0..8)
                .map(|i| HistoryEntry {
                    scene_id: format!("s{i}"),
                    scene_text: format!("text {i}"),
                    choice: format!("choice {i}"),
                })
                .collect(),
            ..SessionSnapshot::default()
        };
        let actions = labels.iter().enumerate().map(|(i, l)| Action::choice(i, *l)).collect();
        RoleContext::new(&snapshot, actions, &TaskConfig::new(PluginKind::Twine, 10, 1_000))
    }

    #[test]
    fn history_is_windowed_to_most_recent_turns() {
        let ctx = context(&["a"]);
        assert_eq!(ctx.history.len(), 5);
        assert_eq!(ctx.history[0].scene_id, "s3");
        assert_eq!(ctx.action_number, 3);
        assert!(!ctx.authoring);
    }

    #[test]
    fn adapters_exist_for_action_roles_only() {
        assert_eq!(adapter_for(Role::Navigator).map(|a| a.role()), Some(Role::Navigator));
        assert_eq!(adapter_for(Role::Proposer).map(|a| a.role()), Some(Role::Proposer));
        assert!(adapter_for(Role::Critic).is_none());
    }

    #[test]
    fn prompt_becomes_system_then_user_messages() {
        let messages = Prompt {
            system: "s".into(),
            user: "u".into(),
        }
        .into_messages();
        assert_eq!(messages[0], ChatMessage::system("s"));
        assert_eq!(messages[1], ChatMessage::user("u"));
    }
}
