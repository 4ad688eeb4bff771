use super::library::StoryLibrary;
use super::story::{Passage, Story};
use crate::action::{Action, ExecuteOutcome, HistoryEntry, SessionSnapshot};
use crate::error::PluginError;
use crate::{PluginContext, ResumePolicy, StoryPlugin};
use async_trait::async_trait;
use bard_core::PluginKind;
use std::sync::Arc;

/// Option key naming the story to play
pub const STORY_ID_OPTION: &str = "storyId";

/// Static hypertext backend. Actions follow passage links.
#[derive(Debug)]
pub struct TwinePlugin {
    library: StoryLibrary,
    story: Option<Arc<Story>>,
    current: String,
    action_count: u32,
    complete: bool,
    history: Vec<HistoryEntry>,
}

impl TwinePlugin {
    /// Plugin reading stories from `library`
    #[must_use]
    pub fn new(library: StoryLibrary) -> Self {
        Self {
            library,
            story: None,
            current: String::new(),
            action_count: 0,
            complete: false,
            history: Vec::new(),
        }
    }

    fn passage(&self) -> Option<&Passage> {
        self.story.as_ref().and_then(|s| s.passage(&self.current))
    }
}

#[async_trait]
impl StoryPlugin for TwinePlugin {
    fn kind(&self) -> PluginKind {
        PluginKind::Twine
    }

    async fn init_headless(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        let story_id = context
            .task_config
            .option_str(STORY_ID_OPTION)
            .ok_or_else(|| PluginError::Initialization(format!("missing '{STORY_ID_OPTION}' option")))?;
        let story = self.library.get(story_id).await?;
        self.current = story.start.clone();
        self.complete = story.passage(&story.start).map_or(true, Passage::is_terminal);
        self.story = Some(story);
        self.action_count = 0;
        self.history.clear();
        tracing::debug!(participant_id = %context.participant_id, story_id, "twine session initialized");
        Ok(())
    }

    fn available_actions(&self) -> Vec<Action> {
        if self.complete {
            return Vec::new();
        }
        self.passage()
            .map(|p| {
                p.links
                    .iter()
                    .enumerate()
                    .map(|(i, link)| Action::choice(i, link.label.clone()).with_target(link.target.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn execute_headless(&mut self, action: &Action) -> ExecuteOutcome {
        let before = self.snapshot();
        let Some(story) = self.story.clone() else {
            return ExecuteOutcome::failed(before, PluginError::NotInitialized.to_string());
        };
        if self.complete {
            return ExecuteOutcome::failed(before, "story already complete");
        }
        let Some(link) = self.passage().and_then(|p| p.links.get(action.index)).cloned() else {
            let error = PluginError::InvalidAction {
                index: action.index,
                reason: format!("passage '{}' has no such link", self.current),
            };
            return ExecuteOutcome::failed(before, error.to_string());
        };
        let Some(next) = story.passage(&link.target) else {
            return ExecuteOutcome::failed(before, format!("link target '{}' missing", link.target));
        };

        self.history.push(HistoryEntry {
            scene_id: before.scene_id,
            scene_text: before.scene_text,
            choice: link.label,
        });
        self.current = next.name.clone();
        self.complete = next.is_terminal();
        self.action_count += 1;
        ExecuteOutcome::applied(self.snapshot())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn snapshot(&self) -> SessionSnapshot {
        let passage = self.passage();
        SessionSnapshot {
            scene_id: self.current.clone(),
            scene_text: passage.map(|p| p.text.clone()).unwrap_or_default(),
            choices: self.available_actions().into_iter().map(|a| a.label).collect(),
            action_count: self.action_count,
            complete: self.complete,
            history: self.history.clone(),
            plugin_state: serde_json::Value::Null,
        }
    }

    fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), PluginError> {
        let story = self.story.as_ref().ok_or(PluginError::NotInitialized)?;
        let passage = story.passage(&snapshot.scene_id).ok_or_else(|| {
            PluginError::Initialization(format!("snapshot passage '{}' not in story", snapshot.scene_id))
        })?;
        self.complete = snapshot.complete || passage.is_terminal();
        self.current = snapshot.scene_id.clone();
        self.action_count = snapshot.action_count;
        self.history = snapshot.history.clone();
        Ok(())
    }

    fn resume_policy(&self) -> ResumePolicy {
        ResumePolicy::Resume
    }
}
