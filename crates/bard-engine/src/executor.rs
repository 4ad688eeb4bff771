//! Session executor
//!
//! Drives one participant's session:
//! `INIT -> (SELECT_ACTION -> APPLY_ACTION -> CHECK_COMPLETION)* -> DONE | EXCLUDED`.
//!
//! Every loop iteration appends exactly one event before advancing. Plugin
//! and gateway failures end the session with a terminal participant state
//! and an ERROR or TIMEOUT event; only store failures escape as errors.

use crate::error::ExecutorError;
use crate::team::{RoundError, TeamProtocol, TokenUsage};
use bard_core::{
    ActorType, Batch, BatchStatus, Event, EventType, ExecutorSettings, Participant,
    ParticipantId, ParticipantState, StudyStore,
};
use bard_llm::{ChatGateway, GatewayError};
use bard_plugin::{
    Action, PluginContext, PluginRegistry, ResumePolicy, SessionSnapshot, StoryPlugin,
};
use bard_roles::{adapter_for, RoleAdapter, RoleContext, RoleError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Receives every event the executor persists
pub trait SessionObserver: Send + Sync {
    /// Called after the event is stored
    fn on_event(&self, event: &Event);
}

/// Why a session ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Plugin reported completion
    StoryComplete,
    /// Action budget exhausted
    MaxActions,
    /// No available actions
    DeadEnd,
}

/// Result of one executor invocation
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Reached COMPLETE in this run
    Completed {
        /// Actions applied over the whole session
        actions: u32,
        /// Why it ended
        reason: CompletionReason,
    },
    /// Reached EXCLUDED in this run
    Excluded {
        /// Cause recorded on the participant
        reason: String,
    },
    /// Batch paused; participant left ACTIVE and resumable
    Paused {
        /// Actions applied so far
        actions: u32,
    },
    /// Participant was already terminal; nothing ran
    AlreadyFinished(ParticipantState),
    /// Human participants are not executed
    Skipped,
}

impl SessionOutcome {
    /// Participant reached a terminal state during this invocation
    #[must_use]
    pub fn finished_now(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Excluded { .. })
    }
}

enum SelectError {
    Timeout(u64),
    Gateway(GatewayError),
    Role(RoleError),
}

impl From<RoundError> for SelectError {
    fn from(error: RoundError) -> Self {
        match error {
            RoundError::Gateway(e) => e.into(),
            RoundError::Role(e) => Self::Role(e),
        }
    }
}

impl From<GatewayError> for SelectError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Timeout { timeout_ms } => Self::Timeout(timeout_ms),
            other => Self::Gateway(other),
        }
    }
}

struct Selection {
    action: Action,
    event_type: EventType,
    payload: Value,
}

/// Runs sessions for participants
pub struct SessionExecutor {
    store: Arc<dyn StudyStore>,
    gateway: Arc<dyn ChatGateway>,
    plugins: Arc<PluginRegistry>,
    settings: ExecutorSettings,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl SessionExecutor {
    /// Executor over the given collaborators
    #[must_use]
    pub fn new(
        store: Arc<dyn StudyStore>,
        gateway: Arc<dyn ChatGateway>,
        plugins: Arc<PluginRegistry>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            plugins,
            settings,
            observer: None,
        }
    }

    /// With an observer receiving every persisted event
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run (or resume) a participant's session until it ends or its batch pauses
    ///
    /// # Errors
    /// Store failures only.
    #[tracing::instrument(skip(self), fields(batch_id = tracing::field::Empty))]
    pub async fn run(&self, participant_id: ParticipantId) -> Result<SessionOutcome, ExecutorError> {
        let participant = self.store.get_participant(participant_id).await?;
        if participant.state.is_terminal() {
            return Ok(SessionOutcome::AlreadyFinished(participant.state));
        }
        if participant.actor_type == ActorType::Human {
            return Ok(SessionOutcome::Skipped);
        }
        tracing::Span::current().record("batch_id", tracing::field::display(participant.batch_id));
        let batch = self.store.get_batch(participant.batch_id).await?;
        if batch.status == BatchStatus::Paused {
            return Ok(SessionOutcome::Paused { actions: 0 });
        }
        if batch.status.is_terminal() {
            return Err(ExecutorError::NotRunnable {
                participant_id,
                state: participant.state,
            });
        }

        let resuming = participant.state == ParticipantState::Active;
        if !resuming {
            self.store
                .transition_participant(participant_id, ParticipantState::Active, None)
                .await?;
        }

        if !batch.task_config.team_mode && adapter_for(participant.role).is_none() {
            let error = format!("role {} cannot select actions on its own", participant.role);
            return self.exclude(participant_id, "init", &error, json!({})).await;
        }

        let mut plugin = match self.plugins.create(&batch.task_config) {
            Ok(plugin) => plugin,
            Err(error) => return self.exclude(participant_id, "init", &error.to_string(), json!({})).await,
        };
        let context = PluginContext {
            participant_id,
            batch_id: batch.id,
            study_id: batch.study_id.clone(),
            role: participant.role,
            partner_id: participant.partner_id,
            task_config: batch.task_config.clone(),
        };
        if let Err(error) = plugin.init_headless(&context).await {
            tracing::warn!(%error, "plugin initialization failed");
            return self.exclude(participant_id, "init", &error.to_string(), json!({})).await;
        }

        let (resumed_from, restarted) = if resuming {
            self.resume(participant_id, plugin.as_mut()).await?
        } else {
            (None, false)
        };
        let start = plugin.snapshot();
        self.emit(
            participant_id,
            EventType::SessionStart,
            json!({
                "pluginType": batch.task_config.plugin_type,
                "role": participant.role,
                "teamMode": batch.task_config.team_mode,
                "partnerId": participant.partner_id,
                "resumed": resumed_from.is_some(),
                "resumedFromAction": resumed_from,
                "restart": restarted,
                "sceneId": start.scene_id,
            }),
        )
        .await?;

        self.drive(&batch, &participant, plugin.as_mut(), start.action_count).await
    }

    async fn drive(
        &self,
        batch: &Batch,
        participant: &Participant,
        plugin: &mut dyn StoryPlugin,
        mut applied: u32,
    ) -> Result<SessionOutcome, ExecutorError> {
        let task = &batch.task_config;
        let adapter = adapter_for(participant.role);
        loop {
            let reason = if plugin.is_complete() {
                Some(CompletionReason::StoryComplete)
            } else if applied >= task.max_actions {
                Some(CompletionReason::MaxActions)
            } else {
                None
            };
            let actions = plugin.available_actions();
            if let Some(reason) = reason.or_else(|| actions.is_empty().then_some(CompletionReason::DeadEnd)) {
                return self.complete(participant.id, applied, reason).await;
            }

            if self.store.get_batch(batch.id).await?.status == BatchStatus::Paused {
                tracing::info!(participant_id = %participant.id, applied, "batch paused, yielding");
                return Ok(SessionOutcome::Paused { actions: applied });
            }

            let before = plugin.snapshot();
            let context = RoleContext::new(&before, actions, task);
            let select = self.select(participant, task.team_mode, adapter.as_deref(), batch, &context);
            // Team rounds bound each phase against the budget themselves
            let selection = if task.team_mode {
                Ok(select.await)
            } else {
                tokio::time::timeout(task.action_timeout(), select).await
            };
            let selection = match selection {
                Err(_) => return self.timeout(participant.id, applied, task.timeout_ms).await,
                Ok(Err(SelectError::Timeout(ms))) => return self.timeout(participant.id, applied, ms).await,
                Ok(Err(SelectError::Gateway(error))) => {
                    let detail = json!({ "actionNumber": applied + 1 });
                    return self.exclude(participant.id, "select", &error.to_string(), detail).await;
                }
                Ok(Err(SelectError::Role(error))) => {
                    let detail = json!({ "actionNumber": applied + 1 });
                    return self.exclude(participant.id, "select", &error.to_string(), detail).await;
                }
                Ok(Ok(selection)) => selection,
            };

            let attempts = self.settings.apply_attempts.max(1);
            let mut last_error = String::new();
            let mut state = None;
            for attempt in 1..=attempts {
                let outcome = plugin.execute_headless(&selection.action).await;
                if outcome.success {
                    state = Some((outcome.state, attempt));
                    break;
                }
                last_error = outcome.error.unwrap_or_else(|| "backend reported failure".into());
                tracing::warn!(
                    participant_id = %participant.id,
                    attempt,
                    error = %last_error,
                    "apply failed"
                );
                if attempt < attempts {
                    tokio::time::sleep(self.settings.apply_retry_delay()).await;
                }
            }
            let Some((after, attempt)) = state else {
                let detail = json!({
                    "actionNumber": applied + 1,
                    "attempts": attempts,
                    "action": selection.action,
                });
                return self.exclude(participant.id, "apply", &last_error, detail).await;
            };

            applied += 1;
            let mut payload = selection.payload;
            if let Value::Object(map) = &mut payload {
                map.insert("actionNumber".into(), json!(applied));
                map.insert("attempts".into(), json!(attempt));
                map.insert("sceneId".into(), json!(before.scene_id));
                map.insert("state".into(), json!(after));
            }
            self.emit(participant.id, selection.event_type, payload).await?;
        }
    }

    async fn select(
        &self,
        participant: &Participant,
        team_mode: bool,
        adapter: Option<&dyn RoleAdapter>,
        batch: &Batch,
        context: &RoleContext,
    ) -> Result<Selection, SelectError> {
        if team_mode {
            let protocol = TeamProtocol::new(
                self.gateway.as_ref(),
                &participant.llm_config,
                batch.task_config.critic_llm_config.as_ref(),
                batch.task_config.revise_after_critique,
            )
            .with_budget(batch.task_config.action_timeout());
            let round = protocol.run_round(context).await?;
            return Ok(Selection {
                action: round.final_action.clone(),
                event_type: EventType::TeamAction,
                payload: round.to_payload(),
            });
        }

        let Some(adapter) = adapter else {
            return Err(SelectError::Role(RoleError::NoActions));
        };
        let prompt = adapter.build_prompt(context);
        let response = self
            .gateway
            .generate_chat(&prompt.into_messages(), &participant.llm_config)
            .await?;
        let action = adapter.parse_response(&response.content, context).map_err(SelectError::Role)?;
        let mut usage = TokenUsage::default();
        usage.record(response.usage);
        Ok(Selection {
            payload: json!({
                "role": adapter.role(),
                "action": action,
                "reasoning": action.metadata.reasoning,
                "provenance": action.metadata.provenance,
                "rawResponse": response.content,
                "finishReason": response.finish_reason,
                "usage": usage,
            }),
            action,
            event_type: EventType::SyntheticAction,
        })
    }

    /// Restore from the last action event, or restart, per the plugin's policy.
    /// Returns the restored action count and whether the session restarted.
    async fn resume(
        &self,
        participant_id: ParticipantId,
        plugin: &mut dyn StoryPlugin,
    ) -> Result<(Option<u32>, bool), ExecutorError> {
        if plugin.resume_policy() == ResumePolicy::Restart {
            return Ok((None, true));
        }
        let events = self.store.events_for_participant(participant_id).await?;
        let snapshot = events
            .iter()
            .rev()
            .find(|e| e.event_type.is_action())
            .and_then(|e| e.payload.get("state"))
            .and_then(|state| serde_json::from_value::<SessionSnapshot>(state.clone()).ok());
        let Some(snapshot) = snapshot else {
            return Ok((None, false));
        };
        match plugin.restore(&snapshot) {
            Ok(()) => Ok((Some(snapshot.action_count), false)),
            Err(error) => {
                tracing::warn!(%participant_id, %error, "snapshot restore failed, restarting");
                Ok((None, true))
            }
        }
    }

    async fn complete(
        &self,
        participant_id: ParticipantId,
        applied: u32,
        reason: CompletionReason,
    ) -> Result<SessionOutcome, ExecutorError> {
        self.emit(
            participant_id,
            EventType::SessionEnd,
            json!({ "reason": reason, "actions": applied }),
        )
        .await?;
        self.store
            .transition_participant(participant_id, ParticipantState::Complete, None)
            .await?;
        tracing::info!(%participant_id, applied, ?reason, "session complete");
        Ok(SessionOutcome::Completed {
            actions: applied,
            reason,
        })
    }

    async fn timeout(
        &self,
        participant_id: ParticipantId,
        applied: u32,
        timeout_ms: u64,
    ) -> Result<SessionOutcome, ExecutorError> {
        self.emit(
            participant_id,
            EventType::Timeout,
            json!({ "actionNumber": applied + 1, "timeoutMs": timeout_ms }),
        )
        .await?;
        let reason = format!("action selection timed out after {timeout_ms}ms");
        self.store
            .transition_participant(participant_id, ParticipantState::Excluded, Some(reason.clone()))
            .await?;
        tracing::warn!(%participant_id, applied, timeout_ms, "session timed out");
        Ok(SessionOutcome::Excluded { reason })
    }

    async fn exclude(
        &self,
        participant_id: ParticipantId,
        phase: &str,
        error: &str,
        detail: Value,
    ) -> Result<SessionOutcome, ExecutorError> {
        let mut payload = json!({ "phase": phase, "error": error });
        if let (Value::Object(map), Value::Object(extra)) = (&mut payload, detail) {
            map.extend(extra);
        }
        self.emit(participant_id, EventType::Error, payload).await?;
        let reason = format!("{phase}: {error}");
        self.store
            .transition_participant(participant_id, ParticipantState::Excluded, Some(reason.clone()))
            .await?;
        tracing::warn!(%participant_id, phase, error, "participant excluded");
        Ok(SessionOutcome::Excluded { reason })
    }

    async fn emit(
        &self,
        participant_id: ParticipantId,
        event_type: EventType,
        payload: Value,
    ) -> Result<Event, ExecutorError> {
        let event = self
            .store
            .append_event(Event::new(participant_id, event_type, payload))
            .await?;
        tracing::debug!(%participant_id, event = %event_type, sequence = event.sequence, "event appended");
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
        Ok(event)
    }
}
