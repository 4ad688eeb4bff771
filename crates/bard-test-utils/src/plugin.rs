//! Scripted story plugin

use async_trait::async_trait;
use bard_core::{PluginKind, TaskConfig};
use bard_plugin::{
    Action, ExecuteOutcome, HistoryEntry, PluginContext, PluginError, PluginRegistry,
    ResumePolicy, SessionSnapshot, StoryPlugin,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Counters shared by every plugin a factory hands out
#[derive(Debug, Default)]
pub struct PluginProbe {
    pub inits: AtomicU32,
    pub apply_calls: AtomicU32,
    pub restores: AtomicU32,
}

impl PluginProbe {
    pub fn inits(&self) -> u32 {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> u32 {
        self.restores.load(Ordering::SeqCst)
    }
}

/// In-process plugin whose behavior is fixed up front
#[derive(Debug, Clone)]
pub struct ScriptedPlugin {
    kind: PluginKind,
    choices: usize,
    complete_after: Option<u32>,
    init_error: Option<String>,
    failing_applies: u32,
    resume: ResumePolicy,
    probe: Arc<PluginProbe>,
    state: SessionSnapshot,
}

impl ScriptedPlugin {
    /// Plugin offering `choices` actions per scene that never completes on its own
    pub fn new(choices: usize) -> Self {
        Self {
            kind: PluginKind::Twine,
            choices,
            complete_after: None,
            init_error: None,
            failing_applies: 0,
            resume: ResumePolicy::Restart,
            probe: Arc::new(PluginProbe::default()),
            state: SessionSnapshot::default(),
        }
    }

    pub fn with_kind(mut self, kind: PluginKind) -> Self {
        self.kind = kind;
        self
    }

    /// Report completion after `actions` applied actions
    pub fn completing_after(mut self, actions: u32) -> Self {
        self.complete_after = Some(actions);
        self
    }

    /// `init_headless` fails with this message
    pub fn failing_init(mut self, message: impl Into<String>) -> Self {
        self.init_error = Some(message.into());
        self
    }

    /// The first `failures` apply calls (across all instances) fail
    pub fn flaky(mut self, failures: u32) -> Self {
        self.failing_applies = failures;
        self
    }

    /// Every apply call fails
    pub fn always_failing_apply(self) -> Self {
        self.flaky(u32::MAX)
    }

    pub fn resumable(mut self) -> Self {
        self.resume = ResumePolicy::Resume;
        self
    }

    pub fn probe(&self) -> Arc<PluginProbe> {
        Arc::clone(&self.probe)
    }

    /// Registry whose factory hands out fresh copies of this plugin for its kind
    pub fn registry(&self) -> PluginRegistry {
        let template = self.clone();
        let mut registry = PluginRegistry::new();
        registry.register(
            self.kind,
            move |_: &TaskConfig| -> Result<Box<dyn StoryPlugin>, PluginError> {
                Ok(Box::new(template.clone()))
            },
        );
        registry
    }

    fn scene(&mut self) {
        let n = self.state.action_count;
        self.state.scene_id = format!("scene-{n}");
        self.state.scene_text = format!("Scene {n}. The path forks.");
        self.state.complete = self.complete_after.is_some_and(|limit| n >= limit);
        self.state.choices = if self.state.complete {
            Vec::new()
        } else {
            (0..self.choices).map(|i| format!("Path {i}")).collect()
        };
    }
}

#[async_trait]
impl StoryPlugin for ScriptedPlugin {
    fn kind(&self) -> PluginKind {
        self.kind
    }

    async fn init_headless(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.init_error {
            return Err(PluginError::Initialization(message.clone()));
        }
        self.state = SessionSnapshot::default();
        self.scene();
        Ok(())
    }

    fn available_actions(&self) -> Vec<Action> {
        self.state
            .choices
            .iter()
            .enumerate()
            .map(|(i, label)| Action::choice(i, label.clone()))
            .collect()
    }

    async fn execute_headless(&mut self, action: &Action) -> ExecuteOutcome {
        let call = self.probe.apply_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failing_applies {
            return ExecuteOutcome::failed(self.state.clone(), "backend unavailable");
        }
        if action.index >= self.state.choices.len() {
            return ExecuteOutcome::failed(self.state.clone(), "no such choice");
        }
        self.state.history.push(HistoryEntry {
            scene_id: self.state.scene_id.clone(),
            scene_text: self.state.scene_text.clone(),
            choice: action.label.clone(),
        });
        self.state.action_count += 1;
        self.scene();
        ExecuteOutcome::applied(self.state.clone())
    }

    fn is_complete(&self) -> bool {
        self.state.complete
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.state.clone()
    }

    fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), PluginError> {
        if self.resume == ResumePolicy::Restart {
            return Err(PluginError::Unsupported("scripted plugin restarts".into()));
        }
        self.probe.restores.fetch_add(1, Ordering::SeqCst);
        self.state = snapshot.clone();
        Ok(())
    }

    fn resume_policy(&self) -> ResumePolicy {
        self.resume
    }
}
