//! Team collaboration protocol
//!
//! One round produces one committed action:
//! - PROPOSED -> ACCEPTED when no critic is configured
//! - PROPOSED -> CRITIQUED -> FINALIZED otherwise
//!
//! The critique is advisory. The final action always comes from the
//! proposer, either the draft or its revision. A failing or stalled critic
//! degrades to an empty critique and never blocks the round.

use bard_core::LlmConfig;
use bard_llm::{ChatGateway, GatewayError, Usage};
use bard_plugin::Action;
use bard_roles::{Critic, Critique, Proposer, RoleAdapter, RoleContext, RoleError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Phases a round passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    /// Proposer produced a draft
    Proposed,
    /// Draft committed without review
    Accepted,
    /// Critic reviewed the draft (or failed to)
    Critiqued,
    /// Final action chosen after review
    Finalized,
}

/// Token usage summed over the calls of one selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Gateway calls made
    pub calls: u32,
    /// Prompt tokens reported
    pub prompt_tokens: u64,
    /// Completion tokens reported
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Count one call and its reported usage
    pub fn record(&mut self, usage: Option<Usage>) {
        self.calls += 1;
        if let Some(usage) = usage {
            self.prompt_tokens += u64::from(usage.prompt_tokens);
            self.completion_tokens += u64::from(usage.completion_tokens);
        }
    }
}

/// Failure of the proposer's draft call
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    /// Gateway failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Reply could not be mapped to an action
    #[error(transparent)]
    Role(#[from] RoleError),
}

/// Full exchange of one round
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRound {
    /// Phases in order
    pub phases: Vec<RoundPhase>,
    /// Proposer draft
    pub draft: Action,
    /// Critic feedback; `None` without a critic, empty when the critic failed
    pub critique: Option<Critique>,
    /// Why the critic produced nothing
    pub critic_error: Option<String>,
    /// Proposer revision, when one was requested and succeeded
    pub revision: Option<Action>,
    /// Action to apply
    pub final_action: Action,
    /// Usage over every call in the round
    pub usage: TokenUsage,
}

impl TeamRound {
    /// Terminal phase reached
    #[must_use]
    pub fn outcome(&self) -> RoundPhase {
        self.phases.last().copied().unwrap_or(RoundPhase::Proposed)
    }

    /// Event payload describing the exchange
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({
            "phase": self.outcome(),
            "phases": self.phases,
            "draft": self.draft,
            "critique": self.critique,
            "criticError": self.critic_error,
            "revision": self.revision,
            "revised": self.revision.as_ref().is_some_and(|r| r.index != self.draft.index),
            "final": self.final_action,
            "usage": self.usage,
        })
    }
}

/// Sequences proposer and critic into one round
pub struct TeamProtocol<'a> {
    gateway: &'a dyn ChatGateway,
    proposer_config: &'a LlmConfig,
    critic_config: Option<&'a LlmConfig>,
    revise: bool,
    budget: Option<Duration>,
}

impl<'a> TeamProtocol<'a> {
    /// Protocol for one participant's configuration
    #[must_use]
    pub fn new(
        gateway: &'a dyn ChatGateway,
        proposer_config: &'a LlmConfig,
        critic_config: Option<&'a LlmConfig>,
        revise: bool,
    ) -> Self {
        Self {
            gateway,
            proposer_config,
            critic_config,
            revise,
            budget: None,
        }
    }

    /// Bound the whole round by `budget`. The draft may use all of it; the
    /// critic gets what is left, halved when a revision must still fit.
    #[inline]
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.budget.map(|budget| budget.saturating_sub(started.elapsed()))
    }

    /// Run one round against the current context
    ///
    /// # Errors
    /// Only when the proposer's draft call fails or outlives the budget.
    /// Critic and revision failures degrade instead.
    pub async fn run_round(&self, context: &RoleContext) -> Result<TeamRound, RoundError> {
        let started = Instant::now();
        let mut usage = TokenUsage::default();
        let draft = bounded(self.budget, self.propose(context, &mut usage))
            .await
            .ok_or_else(|| GatewayError::Timeout {
                timeout_ms: millis(self.budget.unwrap_or_default()),
            })??;
        let mut phases = vec![RoundPhase::Proposed];

        let Some(critic_config) = self.critic_config else {
            phases.push(RoundPhase::Accepted);
            return Ok(TeamRound {
                phases,
                final_action: draft.clone(),
                draft,
                critique: None,
                critic_error: None,
                revision: None,
                usage,
            });
        };

        let review = context.clone().with_draft(draft.clone());
        let critic_limit = self
            .remaining(started)
            .map(|left| if self.revise { left / 2 } else { left });
        let critiqued = bounded(critic_limit, self.critique(&review, critic_config, &mut usage))
            .await
            .unwrap_or_else(|| {
                Err(format!(
                    "critic timed out after {}ms",
                    millis(critic_limit.unwrap_or_default())
                ))
            });
        let (critique, critic_error) = match critiqued {
            Ok(critique) => (critique, None),
            Err(error) => {
                tracing::warn!(%error, "critic failed, continuing with draft");
                (Critique::empty(), Some(error))
            }
        };
        phases.push(RoundPhase::Critiqued);

        let revision = if self.revise && critic_error.is_none() {
            let revise = review.with_critique(critique.clone());
            match bounded(self.remaining(started), self.propose(&revise, &mut usage)).await {
                Some(Ok(action)) => Some(action),
                Some(Err(error)) => {
                    tracing::warn!(%error, "revision failed, keeping draft");
                    None
                }
                None => {
                    tracing::warn!("revision ran out of time, keeping draft");
                    None
                }
            }
        } else {
            None
        };
        phases.push(RoundPhase::Finalized);

        Ok(TeamRound {
            phases,
            final_action: revision.clone().unwrap_or_else(|| draft.clone()),
            draft,
            critique: Some(critique),
            critic_error,
            revision,
            usage,
        })
    }

    async fn propose(
        &self,
        context: &RoleContext,
        usage: &mut TokenUsage,
    ) -> Result<Action, RoundError> {
        let prompt = Proposer.build_prompt(context);
        let response = self
            .gateway
            .generate_chat(&prompt.into_messages(), self.proposer_config)
            .await?;
        usage.record(response.usage);
        Ok(Proposer.parse_response(&response.content, context)?)
    }

    async fn critique(
        &self,
        context: &RoleContext,
        config: &LlmConfig,
        usage: &mut TokenUsage,
    ) -> Result<Critique, String> {
        let prompt = Critic.build_prompt(context);
        let response = self
            .gateway
            .generate_chat(&prompt.into_messages(), config)
            .await
            .map_err(|e| e.to_string())?;
        usage.record(response.usage);
        Critic.parse_critique(&response.content).map_err(|e| e.to_string())
    }
}

/// Await `future`, giving up after `limit`. `None` means it timed out.
async fn bounded<F: Future>(limit: Option<Duration>, future: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bard_core::{PluginKind, Provider, TaskConfig};
    use bard_llm::{ChatMessage, ChatResponse};
    use bard_plugin::SessionSnapshot;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replies in order; errors once the script runs out
    struct Script(Mutex<VecDeque<Result<ChatResponse, GatewayError>>>);

    impl Script {
        fn new(replies: Vec<Result<&str, GatewayError>>) -> Self {
            Self(Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(ChatResponse::text))
                    .collect(),
            ))
        }
    }

    #[async_trait::async_trait]
    impl ChatGateway for Script {
        async fn generate_chat(
            &self,
            _: &[ChatMessage],
            _: &LlmConfig,
        ) -> Result<ChatResponse, GatewayError> {
            self.0
                .lock()
                .pop_front()
                .unwrap_or(Err(GatewayError::Network("script exhausted".into())))
        }
    }

    fn context() -> RoleContext {
        let snapshot = SessionSnapshot {
            scene_id: "Gate".into(),
            scene_text: "A jade dragon guards the gate.".into(),
            ..SessionSnapshot::default()
        };
        let actions = ["Knock", "Leave", "Wait"]
            .iter()
            .enumerate()
            .map(|(i, l)| Action::choice(i, *l))
            .collect();
        RoleContext::new(&snapshot, actions, &TaskConfig::new(PluginKind::Twine, 5, 1_000))
    }

    fn config() -> LlmConfig {
        LlmConfig::new(Provider::Ollama, "gemma3:27b")
    }

    #[tokio::test]
    async fn without_critic_draft_is_accepted() {
        let gateway = Script::new(vec![Ok(r#"{"choiceIndex": 2}"#)]);
        let cfg = config();
        let round = TeamProtocol::new(&gateway, &cfg, None, true)
            .run_round(&context())
            .await
            .unwrap();
        assert_eq!(round.phases, vec![RoundPhase::Proposed, RoundPhase::Accepted]);
        assert_eq!(round.final_action.index, 2);
        assert!(round.critique.is_none());
        assert_eq!(round.usage.calls, 1);
    }

    #[tokio::test]
    async fn critique_then_revision_is_finalized() {
        let gateway = Script::new(vec![
            Ok(r#"{"choiceIndex": 1, "reasoning": "safe"}"#),
            Ok(r#"{"ratings": {"coherence": 2, "creativity": 2, "engagement": 1}, "feedback": "Dull"}"#),
            Ok(r#"{"choiceIndex": 0, "reasoning": "bolder"}"#),
        ]);
        let cfg = config();
        let round = TeamProtocol::new(&gateway, &cfg, Some(&cfg), true)
            .run_round(&context())
            .await
            .unwrap();
        assert_eq!(round.outcome(), RoundPhase::Finalized);
        assert_eq!(round.draft.index, 1);
        assert_eq!(round.final_action.index, 0);
        assert_eq!(round.critique.as_ref().unwrap().feedback, "Dull");
        assert_eq!(round.to_payload()["revised"], true);
        assert_eq!(round.usage.calls, 3);
    }

    #[tokio::test]
    async fn failing_critic_degrades_to_empty_critique() {
        let gateway = Script::new(vec![
            Ok(r#"{"choiceIndex": 1}"#),
            Err(GatewayError::RateLimited { provider: "ollama".into() }),
        ]);
        let cfg = config();
        let round = TeamProtocol::new(&gateway, &cfg, Some(&cfg), true)
            .run_round(&context())
            .await
            .unwrap();
        assert_eq!(round.outcome(), RoundPhase::Finalized);
        assert!(round.critique.as_ref().unwrap().is_empty());
        assert!(round.critic_error.is_some());
        assert_eq!(round.final_action, round.draft);
        assert!(round.revision.is_none());
    }

    #[tokio::test]
    async fn revision_can_be_disabled() {
        let gateway = Script::new(vec![
            Ok(r#"{"choiceIndex": 1}"#),
            Ok(r#"{"feedback": "Fine"}"#),
        ]);
        let cfg = config();
        let round = TeamProtocol::new(&gateway, &cfg, Some(&cfg), false)
            .run_round(&context())
            .await
            .unwrap();
        assert_eq!(round.final_action.index, 1);
        assert_eq!(round.usage.calls, 2);
    }

    #[tokio::test]
    async fn proposer_failure_is_reported() {
        let gateway = Script::new(vec![Err(GatewayError::Timeout { timeout_ms: 10 })]);
        let cfg = config();
        let result = TeamProtocol::new(&gateway, &cfg, None, true).run_round(&context()).await;
        assert!(matches!(result, Err(RoundError::Gateway(e)) if e.is_timeout()));
    }
}
