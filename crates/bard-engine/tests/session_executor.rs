//! Functional tests for the session executor.
//!
//! These drive single participants through scripted plugins and gateways and
//! check the persisted event trail:
//! - every applied action produces exactly one action event
//! - budget exhaustion and plugin completion end the session as COMPLETE
//! - init, selection and apply failures end it as EXCLUDED with one terminal event
//! - team rounds survive a failing critic

use async_trait::async_trait;
use bard_core::{
    Batch, BatchCounter, BatchSpec, BatchStatus, Event, EventType, LlmConfig, Participant,
    ParticipantState, Provider, Role, StudyStore,
};
use bard_engine::{CompletionReason, SessionOutcome};
use bard_llm::{ChatGateway, ChatMessage, ChatResponse, GatewayError};
use bard_plugin::SessionSnapshot;
use bard_roles::Critique;
use bard_test_utils::{batch_spec, task, ScriptedGateway, ScriptedPlugin, TestRuntime};
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Helper: persist a RUNNING batch with one PENDING participant.
async fn seed(runtime: &TestRuntime, spec: BatchSpec) -> (Batch, Participant) {
    let batch = spec.into_batch().unwrap();
    runtime.store.create_batch(batch.clone()).await.unwrap();
    runtime
        .store
        .set_batch_status(batch.id, BatchStatus::Running)
        .await
        .unwrap();
    let participant = Participant::synthetic(&batch, 0);
    runtime
        .store
        .create_participant(participant.clone())
        .await
        .unwrap();
    runtime
        .store
        .increment_batch_counter(batch.id, BatchCounter::Created)
        .await
        .unwrap();
    (batch, participant)
}

fn types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

fn action_events(events: &[Event]) -> Vec<&Event> {
    events.iter().filter(|e| e.event_type.is_action()).collect()
}

/// Helper: run one navigator session against a plugin with three choices
/// that completes after one action, with the gateway answering `reply`.
async fn single_choice(reply: &str) -> Event {
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::replying(reply)),
        ScriptedPlugin::new(3).completing_after(1).registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(10))).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            actions: 1,
            reason: CompletionReason::StoryComplete
        }
    );

    let events = runtime.events(participant.id).await;
    assert_eq!(
        types(&events),
        vec![
            EventType::SessionStart,
            EventType::SyntheticAction,
            EventType::SessionEnd
        ]
    );
    events[1].clone()
}

/// A structured reply selects the index it names.
#[tokio::test]
async fn structured_reply_selects_named_index() {
    let event = single_choice(r#"{"choiceIndex": 1, "reasoning": "test"}"#).await;
    assert_eq!(event.payload["action"]["index"], 1);
    assert_eq!(event.payload["provenance"], "structured");
    assert_eq!(event.payload["reasoning"], "test");
    assert_eq!(event.payload["actionNumber"], 1);
}

/// Free text falls back to the first standalone integer.
#[tokio::test]
async fn free_text_reply_uses_integer_scan() {
    let event = single_choice("I think option 2 is best").await;
    assert_eq!(event.payload["action"]["index"], 2);
    assert_eq!(event.payload["provenance"], "integer_scan");
}

/// A reply with nothing usable falls back to the first action.
#[tokio::test]
async fn unusable_reply_defaults_to_first_action() {
    let event = single_choice("no numbers here").await;
    assert_eq!(event.payload["action"]["index"], 0);
    assert_eq!(event.payload["provenance"], "default");
}

/// Exhausting the action budget is a normal completion, not a failure.
#[tokio::test]
async fn budget_exhaustion_completes_after_exactly_max_actions() {
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::replying(r#"{"choiceIndex": 0}"#)),
        ScriptedPlugin::new(3).registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(5))).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            actions: 5,
            reason: CompletionReason::MaxActions
        }
    );

    let events = runtime.events(participant.id).await;
    assert_eq!(action_events(&events).len(), 5);
    assert_eq!(events.last().unwrap().payload["reason"], "max_actions");

    let stored = runtime.store.get_participant(participant.id).await.unwrap();
    assert_eq!(stored.state, ParticipantState::Complete);
    assert!(stored.completed_at.is_some());
}

/// A failing init excludes the participant with one ERROR event and no actions.
#[tokio::test]
async fn init_failure_excludes_with_single_error_event() {
    let plugin = ScriptedPlugin::new(3).failing_init("story service down");
    let probe = plugin.probe();
    let gateway = Arc::new(ScriptedGateway::replying("0"));
    let runtime = TestRuntime::new(gateway.clone(), plugin.registry());
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(5))).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Excluded { .. }));

    let events = runtime.events(participant.id).await;
    assert_eq!(types(&events), vec![EventType::Error]);
    assert_eq!(events[0].payload["phase"], "init");
    assert!(action_events(&events).is_empty());

    let stored = runtime.store.get_participant(participant.id).await.unwrap();
    assert_eq!(stored.state, ParticipantState::Excluded);
    assert!(stored.exclusion_reason.unwrap().contains("story service down"));
    assert_eq!(probe.inits(), 1);
    assert_eq!(gateway.call_count(), 0);
}

/// Transient backend failures are retried with the same action.
#[tokio::test]
async fn transient_apply_failures_are_retried() {
    let plugin = ScriptedPlugin::new(2).completing_after(1).flaky(2);
    let probe = plugin.probe();
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::replying(r#"{"choiceIndex": 1}"#)),
        plugin.registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(5))).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert!(outcome.finished_now());
    assert_eq!(probe.apply_calls(), 3);

    let events = runtime.events(participant.id).await;
    let actions = action_events(&events);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].payload["attempts"], 3);
}

/// A backend that keeps failing excludes the participant after the retry budget.
#[tokio::test]
async fn persistent_apply_failure_excludes() {
    let plugin = ScriptedPlugin::new(2).always_failing_apply();
    let probe = plugin.probe();
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::replying("1")),
        plugin.registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(5))).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Excluded { .. }));
    assert_eq!(probe.apply_calls(), 3);

    let events = runtime.events(participant.id).await;
    assert_eq!(types(&events), vec![EventType::SessionStart, EventType::Error]);
    assert_eq!(events[1].payload["phase"], "apply");
    assert_eq!(events[1].payload["attempts"], 3);
}

/// A stalled model hits the per-action timeout and is not retried.
#[tokio::test(start_paused = true)]
async fn stalled_selection_times_out() {
    let gateway = Arc::new(ScriptedGateway::replying("1").with_delay(Duration::from_secs(60)));
    let runtime = TestRuntime::new(gateway.clone(), ScriptedPlugin::new(3).registry());
    let mut config = task(5);
    config.timeout_ms = 50;
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, config)).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Excluded { .. }));

    let events = runtime.events(participant.id).await;
    assert_eq!(types(&events), vec![EventType::SessionStart, EventType::Timeout]);
    assert_eq!(events[1].payload["timeoutMs"], 50);
    assert_eq!(gateway.call_count(), 1);
}

/// A gateway-reported timeout is treated like the executor's own timeout.
#[tokio::test]
async fn gateway_timeout_records_timeout_event() {
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::failing(GatewayError::Timeout { timeout_ms: 30 })),
        ScriptedPlugin::new(3).registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(5))).await;

    runtime.executor.run(participant.id).await.unwrap();
    let events = runtime.events(participant.id).await;
    assert_eq!(events.last().unwrap().event_type, EventType::Timeout);
}

/// Other gateway failures record an ERROR in the select phase.
#[tokio::test]
async fn gateway_failure_excludes_in_select_phase() {
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::failing(GatewayError::MissingCredentials {
            provider: "openai".into(),
        })),
        ScriptedPlugin::new(3).registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(5))).await;

    runtime.executor.run(participant.id).await.unwrap();
    let events = runtime.events(participant.id).await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.payload["phase"], "select");
    assert_eq!(last.payload["actionNumber"], 1);
}

/// Terminal participants are never re-run.
#[tokio::test]
async fn finished_participant_is_not_rerun() {
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::replying("0")),
        ScriptedPlugin::new(2).completing_after(1).registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(5))).await;

    assert!(runtime.executor.run(participant.id).await.unwrap().finished_now());
    let again = runtime.executor.run(participant.id).await.unwrap();
    assert_eq!(again, SessionOutcome::AlreadyFinished(ParticipantState::Complete));
    assert_eq!(runtime.events(participant.id).await.len(), 3);
}

/// The injected observer sees exactly the persisted events.
#[tokio::test]
async fn observer_receives_every_event() {
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::replying("0")),
        ScriptedPlugin::new(2).registry(),
    );
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(3))).await;

    runtime.executor.run(participant.id).await.unwrap();
    assert_eq!(runtime.observer.events(), runtime.events(participant.id).await);
}

/// Helper: mark a participant ACTIVE with two recorded actions, as if a
/// worker crashed mid-session.
async fn crash_after_two_actions(runtime: &TestRuntime, participant: &Participant) {
    runtime
        .store
        .transition_participant(participant.id, ParticipantState::Active, None)
        .await
        .unwrap();
    runtime
        .store
        .append_event(Event::new(participant.id, EventType::SessionStart, json!({})))
        .await
        .unwrap();
    for n in 1..=2u32 {
        let state = SessionSnapshot {
            scene_id: format!("scene-{n}"),
            scene_text: format!("Scene {n}. The path forks."),
            choices: vec!["Path 0".into(), "Path 1".into()],
            action_count: n,
            ..SessionSnapshot::default()
        };
        runtime
            .store
            .append_event(Event::new(
                participant.id,
                EventType::SyntheticAction,
                json!({ "actionNumber": n, "state": state }),
            ))
            .await
            .unwrap();
    }
}

/// Resumable plugins continue from the last snapshotted action.
#[tokio::test]
async fn resumable_plugin_continues_from_last_snapshot() {
    let plugin = ScriptedPlugin::new(2).resumable();
    let probe = plugin.probe();
    let runtime = TestRuntime::new(Arc::new(ScriptedGateway::replying("0")), plugin.registry());
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(4))).await;
    crash_after_two_actions(&runtime, &participant).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            actions: 4,
            reason: CompletionReason::MaxActions
        }
    );
    assert_eq!(probe.restores(), 1);

    let events = runtime.events(participant.id).await;
    let restart = events
        .iter()
        .filter(|e| e.event_type == EventType::SessionStart)
        .last()
        .unwrap();
    assert_eq!(restart.payload["resumed"], true);
    assert_eq!(restart.payload["resumedFromAction"], 2);
    assert_eq!(action_events(&events).len(), 4);
}

/// Plugins that cannot resume restart cleanly and say so.
#[tokio::test]
async fn restart_policy_starts_over() {
    let plugin = ScriptedPlugin::new(2);
    let probe = plugin.probe();
    let runtime = TestRuntime::new(Arc::new(ScriptedGateway::replying("1")), plugin.registry());
    let (_, participant) = seed(&runtime, batch_spec(1, Role::Navigator, task(4))).await;
    crash_after_two_actions(&runtime, &participant).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            actions: 4,
            reason: CompletionReason::MaxActions
        }
    );
    assert_eq!(probe.restores(), 0);

    let events = runtime.events(participant.id).await;
    let restart = &events[3];
    assert_eq!(restart.event_type, EventType::SessionStart);
    assert_eq!(restart.payload["restart"], true);
    assert_eq!(restart.payload["resumed"], false);
}

/// Gateway that pauses the batch while answering its second call.
struct PausingGateway {
    runtime_store: Arc<bard_core::InMemoryStore>,
    batch_id: bard_core::BatchId,
    calls: AtomicU32,
}

#[async_trait]
impl ChatGateway for PausingGateway {
    async fn generate_chat(
        &self,
        _: &[ChatMessage],
        _: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.runtime_store
                .set_batch_status(self.batch_id, BatchStatus::Paused)
                .await
                .unwrap();
        }
        Ok(ChatResponse::text("0"))
    }
}

/// Pausing is cooperative: the running session finishes its current action
/// and yields before the next one, staying ACTIVE.
#[tokio::test]
async fn pause_is_observed_between_iterations() {
    let store = Arc::new(bard_core::InMemoryStore::new());
    let spec = batch_spec(1, Role::Navigator, task(5));
    let batch = spec.into_batch().unwrap();
    store.create_batch(batch.clone()).await.unwrap();
    store.set_batch_status(batch.id, BatchStatus::Running).await.unwrap();
    let participant = Participant::synthetic(&batch, 0);
    store.create_participant(participant.clone()).await.unwrap();

    let gateway = Arc::new(PausingGateway {
        runtime_store: store.clone(),
        batch_id: batch.id,
        calls: AtomicU32::new(0),
    });
    let plugin = ScriptedPlugin::new(2).resumable();
    let executor = bard_engine::SessionExecutor::new(
        store.clone(),
        gateway,
        Arc::new(plugin.registry()),
        bard_test_utils::fast_executor_settings(),
    );

    let outcome = executor.run(participant.id).await.unwrap();
    assert_eq!(outcome, SessionOutcome::Paused { actions: 2 });
    let stored = store.get_participant(participant.id).await.unwrap();
    assert_eq!(stored.state, ParticipantState::Active);

    store.set_batch_status(batch.id, BatchStatus::Running).await.unwrap();
    let outcome = executor.run(participant.id).await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Completed {
            actions: 5,
            reason: CompletionReason::MaxActions
        }
    );
}

/// Team mode without a critic commits the proposer's draft.
#[tokio::test]
async fn team_round_without_critic_is_accepted() {
    let runtime = TestRuntime::new(
        Arc::new(ScriptedGateway::replying(r#"{"choiceIndex": 2, "reasoning": "bold"}"#)),
        ScriptedPlugin::new(3).completing_after(1).registry(),
    );
    let spec = batch_spec(1, Role::Proposer, task(5).with_team(None));
    let (_, participant) = seed(&runtime, spec).await;

    runtime.executor.run(participant.id).await.unwrap();
    let events = runtime.events(participant.id).await;
    let actions = action_events(&events);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].event_type, EventType::TeamAction);
    assert_eq!(actions[0].payload["phase"], "ACCEPTED");
    assert_eq!(actions[0].payload["final"]["index"], 2);
}

/// A critique followed by a revision commits the revision.
#[tokio::test]
async fn team_round_applies_revision() {
    let gateway = Arc::new(
        ScriptedGateway::sequence([
            r#"{"choiceIndex": 0, "reasoning": "safe"}"#,
            r#"{"ratings": {"coherence": 4, "creativity": 1, "engagement": 2}, "feedback": "Too timid"}"#,
            r#"{"choiceIndex": 2, "reasoning": "take the risk"}"#,
        ])
        .with_usage(100, 20),
    );
    let runtime = TestRuntime::new(
        gateway.clone(),
        ScriptedPlugin::new(3).completing_after(1).registry(),
    );
    let critic = LlmConfig::new(Provider::Anthropic, "critic-model");
    let spec = batch_spec(1, Role::Proposer, task(5).with_team(Some(critic)));
    let (_, participant) = seed(&runtime, spec).await;

    runtime.executor.run(participant.id).await.unwrap();
    let events = runtime.events(participant.id).await;
    let round = action_events(&events)[0];
    assert_eq!(round.payload["phase"], "FINALIZED");
    assert_eq!(round.payload["draft"]["index"], 0);
    assert_eq!(round.payload["final"]["index"], 2);
    assert_eq!(round.payload["critique"]["feedback"], "Too timid");
    assert_eq!(round.payload["usage"]["calls"], 3);
    assert_eq!(round.payload["usage"]["promptTokens"], 300);
    assert_eq!(gateway.calls()[1].model, "critic-model");
}

mock! {
    Gateway {}

    #[async_trait]
    impl ChatGateway for Gateway {
        async fn generate_chat(
            &self,
            messages: &[ChatMessage],
            config: &LlmConfig,
        ) -> Result<ChatResponse, GatewayError>;
    }
}

/// A critic that always errors never blocks the round: exactly one
/// TEAM_ACTION is recorded, carrying an empty critique.
#[tokio::test]
async fn failing_critic_still_commits_one_team_action() {
    let mut gateway = MockGateway::new();
    gateway
        .expect_generate_chat()
        .returning(|_, config| {
            if config.model == "critic-model" {
                Err(GatewayError::Upstream {
                    status: 500,
                    body: "critic crashed".into(),
                })
            } else {
                Ok(ChatResponse::text(r#"{"choiceIndex": 1, "reasoning": "door"}"#))
            }
        });
    let runtime = TestRuntime::new(Arc::new(gateway), ScriptedPlugin::new(3).registry());
    let critic = LlmConfig::new(Provider::OpenAi, "critic-model");
    let spec = batch_spec(1, Role::Proposer, task(1).with_team(Some(critic)));
    let (_, participant) = seed(&runtime, spec).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert!(outcome.finished_now());

    let events = runtime.events(participant.id).await;
    let rounds: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::TeamAction)
        .collect();
    assert_eq!(rounds.len(), 1);
    let critique: Critique = serde_json::from_value(rounds[0].payload["critique"].clone()).unwrap();
    assert!(critique.is_empty());
    assert!(rounds[0].payload["criticError"]
        .as_str()
        .unwrap()
        .contains("critic crashed"));
    assert_eq!(rounds[0].payload["final"]["index"], 1);
}

/// Gateway whose critic model answers only after `critic_delay`
struct SlowCritic {
    critic_delay: Duration,
    proposer_delay: Duration,
}

#[async_trait]
impl ChatGateway for SlowCritic {
    async fn generate_chat(
        &self,
        _: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<ChatResponse, GatewayError> {
        if config.model == "critic-model" {
            tokio::time::sleep(self.critic_delay).await;
            return Ok(ChatResponse::text(r#"{"coherence": 2, "feedback": "too late"}"#));
        }
        tokio::time::sleep(self.proposer_delay).await;
        Ok(ChatResponse::text(r#"{"choiceIndex": 2, "reasoning": "stairs"}"#))
    }
}

fn slow_critic_spec(proposer_delay: Duration) -> (Arc<SlowCritic>, BatchSpec) {
    let gateway = Arc::new(SlowCritic {
        critic_delay: Duration::from_millis(400),
        proposer_delay,
    });
    let critic = LlmConfig::new(Provider::Anthropic, "critic-model");
    let mut config = task(1).with_team(Some(critic));
    config.timeout_ms = 300;
    (gateway, batch_spec(1, Role::Proposer, config))
}

/// A critic slower than the action budget degrades to an empty critique;
/// the draft is committed and the participant is not excluded.
#[tokio::test(start_paused = true)]
async fn stalled_critic_does_not_time_out_the_round() {
    let (gateway, spec) = slow_critic_spec(Duration::ZERO);
    let runtime = TestRuntime::new(gateway, ScriptedPlugin::new(3).registry());
    let (_, participant) = seed(&runtime, spec).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert!(matches!(
        outcome,
        SessionOutcome::Completed {
            actions: 1,
            reason: CompletionReason::MaxActions
        }
    ));

    let events = runtime.events(participant.id).await;
    assert_eq!(
        types(&events),
        vec![EventType::SessionStart, EventType::TeamAction, EventType::SessionEnd]
    );
    let round = &events[1].payload;
    let critique: Critique = serde_json::from_value(round["critique"].clone()).unwrap();
    assert!(critique.is_empty());
    assert!(round["criticError"].as_str().unwrap().contains("timed out"));
    assert_eq!(round["phase"], "FINALIZED");
    assert_eq!(round["final"]["index"], 2);
}

/// The proposer's draft is still bound by the action budget.
#[tokio::test(start_paused = true)]
async fn stalled_proposer_times_out_the_round() {
    let (gateway, spec) = slow_critic_spec(Duration::from_secs(5));
    let runtime = TestRuntime::new(gateway, ScriptedPlugin::new(3).registry());
    let (_, participant) = seed(&runtime, spec).await;

    let outcome = runtime.executor.run(participant.id).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Excluded { .. }));

    let events = runtime.events(participant.id).await;
    assert_eq!(types(&events), vec![EventType::SessionStart, EventType::Timeout]);
    assert_eq!(events[1].payload["timeoutMs"], 300);
}
