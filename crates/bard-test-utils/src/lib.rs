//! Testing utilities for the Silent Bard workspace
//!
//! Scripted doubles, story fixtures and a wired runtime for integration tests.

#![allow(missing_docs)]

pub mod gateway;
pub mod plugin;

pub use gateway::{RecordedCall, ScriptedGateway};
pub use plugin::{PluginProbe, ScriptedPlugin};

use bard_core::{
    BatchSpec, Event, ExecutorSettings, InMemoryStore, LlmConfig, ParticipantId, PluginKind,
    Provider, QueueSettings, RetryPolicy, Role, StudyId, StudyStore, TaskConfig,
};
use bard_engine::{JobQueue, Orchestrator, SessionExecutor, SessionObserver, WorkerPool};
use bard_llm::ChatGateway;
use bard_plugin::{PluginRegistry, Story, StoryLibrary};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const ROMANCE_FANTASY: &str = r#"{
  "id": "romance_fantasy",
  "title": "The Moonlit Ball",
  "start": "Ball",
  "passages": [
    {"name": "Ball", "text": "Music swells beneath the chandeliers. [[Dance->Floor]] [[Step outside|Garden]] [[Watch the crowd->Balcony]]"},
    {"name": "Floor", "text": "A stranger in silver takes your hand. [[Follow the stranger->Garden]] [[Balcony]]"},
    {"name": "Balcony", "text": "The city glitters below. [[Garden]]"},
    {"name": "Garden", "text": "Moonlight on the roses. The night ends here.", "tags": ["end"]}
  ]
}"#;

pub fn romance_fantasy() -> Story {
    Story::from_json(ROMANCE_FANTASY).unwrap()
}

/// Registry with the Twine backend over a library holding [`ROMANCE_FANTASY`]
pub async fn twine_registry() -> PluginRegistry {
    let library = StoryLibrary::default();
    library.insert(romance_fantasy()).await.unwrap();
    let mut registry = PluginRegistry::new();
    registry.register(
        PluginKind::Twine,
        move |_: &TaskConfig| -> Result<Box<dyn bard_plugin::StoryPlugin>, bard_plugin::PluginError> {
            Ok(Box::new(bard_plugin::TwinePlugin::new(library.clone())))
        },
    );
    registry
}

pub fn llm_config() -> LlmConfig {
    LlmConfig::new(Provider::Ollama, "gemma3:27b")
}

pub fn task(max_actions: u32) -> TaskConfig {
    TaskConfig::new(PluginKind::Twine, max_actions, 5_000)
        .with_plugin_options(serde_json::json!({ "storyId": "romance_fantasy" }))
}

pub fn batch_spec(actor_count: u32, role: Role, task: TaskConfig) -> BatchSpec {
    BatchSpec {
        study_id: StudyId::new("pilot"),
        actor_count,
        role,
        llm_config: llm_config(),
        task_config: task,
    }
}

/// Queue settings with short delays so retries finish quickly in tests
pub fn fast_queue_settings() -> QueueSettings {
    QueueSettings {
        workers: 2,
        create_retry: RetryPolicy::fixed(2, Duration::from_millis(5)),
        execute_retry: RetryPolicy::exponential(3, Duration::from_millis(5)),
        poll_interval_ms: 2,
        snapshot_path: None,
    }
}

pub fn fast_executor_settings() -> ExecutorSettings {
    ExecutorSettings {
        apply_attempts: 3,
        apply_retry_delay_ms: 1,
    }
}

/// Observer that keeps every event it sees
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Store, queue, executor and orchestrator wired together
pub struct TestRuntime {
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<JobQueue>,
    pub executor: Arc<SessionExecutor>,
    pub orchestrator: Arc<Orchestrator>,
    pub observer: Arc<RecordingObserver>,
}

impl TestRuntime {
    pub fn new(gateway: Arc<dyn ChatGateway>, plugins: PluginRegistry) -> Self {
        Self::with_settings(gateway, plugins, fast_queue_settings())
    }

    pub fn with_settings(
        gateway: Arc<dyn ChatGateway>,
        plugins: PluginRegistry,
        settings: QueueSettings,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(JobQueue::new());
        let observer = Arc::new(RecordingObserver::default());
        let executor = Arc::new(
            SessionExecutor::new(
                store.clone(),
                gateway,
                Arc::new(plugins),
                fast_executor_settings(),
            )
            .with_observer(observer.clone()),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            queue.clone(),
            executor.clone(),
            settings,
        ));
        Self {
            store,
            queue,
            executor,
            orchestrator,
            observer,
        }
    }

    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.orchestrator.clone())
    }

    pub async fn events(&self, participant_id: ParticipantId) -> Vec<Event> {
        self.store.events_for_participant(participant_id).await.unwrap()
    }
}
