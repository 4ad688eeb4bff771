//! Silent Bard story plugins
//!
//! Every story backend implements [`StoryPlugin`]. The executor only sees
//! this contract:
//! - `init_headless` establishes backend session state (fatal on failure)
//! - `available_actions` lists legal moves; empty means dead end
//! - `execute_headless` applies one action, leaving state unchanged on failure
//! - `is_complete` reports the flag set by the last application
//!
//! Plugins never touch the persistence store. [`PluginRegistry`] selects an
//! implementation by [`PluginKind`](bard_core::PluginKind) when a job is built.

#![warn(unreachable_pub)]

pub mod action;
pub mod dynamic;
pub mod error;
pub mod registry;
pub mod twine;

pub use action::{
    Action, ActionMetadata, AuthoredContent, AuthoredStatus, ExecuteOutcome, HistoryEntry,
    ParseProvenance, SessionSnapshot,
};
pub use dynamic::{DynamicStoryPlugin, HttpStoryService, StoryService, StoryTurn};
pub use error::PluginError;
pub use registry::{PluginFactory, PluginRegistry};
pub use twine::{Story, StoryIssue, StoryLibrary, TwinePlugin};

use async_trait::async_trait;
use bard_core::{BatchId, ParticipantId, PluginKind, Role, StudyId, TaskConfig};
use serde::{Deserialize, Serialize};

/// What a plugin does with a participant found mid-session after a crash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Restore the last snapshot and continue
    Resume,
    /// Start a fresh session
    Restart,
}

/// Actor identity and configuration handed to `init_headless`
#[derive(Debug, Clone, PartialEq)]
pub struct PluginContext {
    /// Participant being run
    pub participant_id: ParticipantId,
    /// Owning batch
    pub batch_id: BatchId,
    /// Owning study
    pub study_id: StudyId,
    /// Role the actor plays
    pub role: Role,
    /// Partner in a paired team session
    pub partner_id: Option<ParticipantId>,
    /// Session configuration, including backend options
    pub task_config: TaskConfig,
}

/// Execution contract every story backend satisfies
#[async_trait]
pub trait StoryPlugin: Send + Sync {
    /// Backend identifier
    fn kind(&self) -> PluginKind;

    /// Establish backend session state
    async fn init_headless(&mut self, context: &PluginContext) -> Result<(), PluginError>;

    /// Legal next actions; empty signals a dead end
    fn available_actions(&self) -> Vec<Action>;

    /// Apply exactly one action
    async fn execute_headless(&mut self, action: &Action) -> ExecuteOutcome;

    /// Completion flag from the last application
    fn is_complete(&self) -> bool;

    /// Current state
    fn snapshot(&self) -> SessionSnapshot;

    /// Continue from a snapshot taken by the same kind of plugin. Called
    /// after `init_headless`.
    fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), PluginError> {
        let _ = snapshot;
        Err(PluginError::Unsupported(format!(
            "{} sessions cannot be restored",
            self.kind()
        )))
    }

    /// Crash-recovery policy
    fn resume_policy(&self) -> ResumePolicy {
        ResumePolicy::Restart
    }
}
