//! Persisted study entities: batches, participants and events

use crate::error::CoreError;
use crate::types::{BatchId, EventId, LlmConfig, ParticipantId, Role, StudyId, TaskConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Submitted, creation job not yet run
    Queued,
    /// Participants created and executing
    Running,
    /// No new session jobs start until resumed
    Paused,
    /// Every participant reached a terminal state
    Complete,
    /// Creation failed permanently
    Failed,
}

impl BatchStatus {
    /// COMPLETE and FAILED batches are immutable
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Kind of actor behind a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    /// A person using the front end
    Human,
    /// LLM-driven actor executed by the engine
    Synthetic,
}

/// Participant lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// Created, never executed
    Pending,
    /// An executor holds the session
    Active,
    /// Story finished or budget reached
    Complete,
    /// Unrecoverable failure
    Excluded,
}

impl ParticipantState {
    /// COMPLETE and EXCLUDED are terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Excluded)
    }
}

/// Which batch counter to bump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchCounter {
    /// `actorsCreated`
    Created,
    /// `actorsCompleted`
    Completed,
}

/// Batch specification as submitted by study setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSpec {
    /// Owning study
    pub study_id: StudyId,
    /// Requested number of participants
    pub actor_count: u32,
    /// Role every participant plays
    pub role: Role,
    /// Actor model
    pub llm_config: LlmConfig,
    /// Session configuration
    pub task_config: TaskConfig,
}

impl BatchSpec {
    /// Validate and turn into a QUEUED batch
    ///
    /// # Errors
    /// `CoreError::InvalidConfig` for an empty batch, a critic role, or an
    /// invalid task configuration.
    pub fn into_batch(self) -> Result<Batch, CoreError> {
        if self.actor_count == 0 {
            return Err(CoreError::InvalidConfig("actorCount must be at least 1".into()));
        }
        if self.role == Role::Critic {
            return Err(CoreError::InvalidConfig(
                "critic is a team sub-role, not a participant role".into(),
            ));
        }
        self.task_config.validate()?;
        let now = Utc::now();
        Ok(Batch {
            id: BatchId::new(),
            study_id: self.study_id,
            actor_count: self.actor_count,
            role: self.role,
            llm_config: self.llm_config,
            task_config: self.task_config,
            status: BatchStatus::Queued,
            actors_created: 0,
            actors_completed: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A unit of work that expands into many participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Batch id
    pub id: BatchId,
    /// Owning study
    pub study_id: StudyId,
    /// Requested number of participants
    pub actor_count: u32,
    /// Role every participant plays
    pub role: Role,
    /// Actor model
    pub llm_config: LlmConfig,
    /// Session configuration
    pub task_config: TaskConfig,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Participants created so far
    pub actors_created: u32,
    /// Participants that reached a terminal state
    pub actors_completed: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// All requested participants exist
    #[inline]
    #[must_use]
    pub fn fully_created(&self) -> bool {
        self.actors_created >= self.actor_count
    }

    /// All requested participants reached a terminal state
    #[inline]
    #[must_use]
    pub fn all_finished(&self) -> bool {
        self.actors_completed >= self.actor_count
    }
}

/// One actor's run through a study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Participant id
    pub id: ParticipantId,
    /// Owning batch
    pub batch_id: BatchId,
    /// Position within the batch (0-based)
    pub ordinal: u32,
    /// Human or synthetic
    pub actor_type: ActorType,
    /// Role played
    pub role: Role,
    /// Actor model
    pub llm_config: LlmConfig,
    /// Lifecycle state
    pub state: ParticipantState,
    /// Paired participant, for paired team sessions
    pub partner_id: Option<ParticipantId>,
    /// Why the participant was excluded
    pub exclusion_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time the participant reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl Participant {
    /// New PENDING synthetic participant inheriting the batch configuration
    #[must_use]
    pub fn synthetic(batch: &Batch, ordinal: u32) -> Self {
        Self {
            id: ParticipantId::new(),
            batch_id: batch.id,
            ordinal,
            actor_type: ActorType::Synthetic,
            role: batch.role,
            llm_config: batch.llm_config.clone(),
            state: ParticipantState::Pending,
            partner_id: None,
            exclusion_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Canonical event types
///
/// Serialized as SCREAMING_SNAKE_CASE. Older exports used several spellings;
/// those are accepted only through [`EventType::migrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Plugin initialized, loop starting
    SessionStart,
    /// Loop finished normally
    SessionEnd,
    /// One individually selected action
    SyntheticAction,
    /// One committed team round
    TeamAction,
    /// Selection exceeded its timeout
    Timeout,
    /// Unrecoverable failure
    Error,
}

impl EventType {
    /// Canonical name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::SessionStart => "SESSION_START",
            EventType::SessionEnd => "SESSION_END",
            EventType::SyntheticAction => "SYNTHETIC_ACTION",
            EventType::TeamAction => "TEAM_ACTION",
            EventType::Timeout => "TIMEOUT",
            EventType::Error => "ERROR",
        }
    }

    /// Map a historical spelling onto the canonical enumeration
    #[must_use]
    pub fn migrate(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' ', '.'], "_");
        match normalized.as_str() {
            "SESSION_START" | "SESSIONSTART" | "START" => Some(Self::SessionStart),
            "SESSION_END" | "SESSIONEND" | "END" | "COMPLETE" => Some(Self::SessionEnd),
            "SYNTHETIC_ACTION" | "SYNTHETICACTION" | "ACTION" | "AI_ACTION" => {
                Some(Self::SyntheticAction)
            }
            "TEAM_ACTION" | "TEAMACTION" | "TEAM_ROUND" => Some(Self::TeamAction),
            "TIMEOUT" | "TIMED_OUT" => Some(Self::Timeout),
            "ERROR" | "FAILURE" => Some(Self::Error),
            _ => None,
        }
    }

    /// Terminal events close a session
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SessionEnd | Self::Timeout | Self::Error)
    }

    /// Action events record one applied plugin action
    #[inline]
    #[must_use]
    pub fn is_action(self) -> bool {
        matches!(self, Self::SyntheticAction | Self::TeamAction)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one action or protocol step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event id
    pub id: EventId,
    /// Owning participant
    pub participant_id: ParticipantId,
    /// Position in the participant's stream, assigned by the store
    pub sequence: u64,
    /// Event type
    pub event_type: EventType,
    /// Structured payload (reasoning, chosen action, team exchange, ...)
    pub payload: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// New event; the store assigns the sequence number on append
    #[must_use]
    pub fn new(
        participant_id: ParticipantId,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            participant_id,
            sequence: 0,
            event_type,
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PluginKind, Provider};

    fn spec(actor_count: u32) -> BatchSpec {
        BatchSpec {
            study_id: StudyId::new("fdg-pilot"),
            actor_count,
            role: Role::Navigator,
            llm_config: LlmConfig::new(Provider::Ollama, "llama3.2:3b"),
            task_config: TaskConfig::new(PluginKind::Twine, 10, 30_000),
        }
    }

    #[test]
    fn batch_spec_produces_queued_batch() {
        let batch = spec(3).into_batch().unwrap();
        assert_eq!(batch.status, BatchStatus::Queued);
        assert_eq!(batch.actors_created, 0);
        assert!(!batch.fully_created());
    }

    #[test]
    fn batch_spec_rejects_empty_and_critic_batches() {
        assert!(spec(0).into_batch().is_err());
        let mut critic = spec(1);
        critic.role = Role::Critic;
        assert!(critic.into_batch().is_err());
    }

    #[test]
    fn event_type_migration_accepts_historical_spellings() {
        assert_eq!(EventType::migrate("synthetic_action"), Some(EventType::SyntheticAction));
        assert_eq!(EventType::migrate("ACTION"), Some(EventType::SyntheticAction));
        assert_eq!(EventType::migrate("team-action"), Some(EventType::TeamAction));
        assert_eq!(EventType::migrate("session_end"), Some(EventType::SessionEnd));
        assert_eq!(EventType::migrate("unknown"), None);
    }

    #[test]
    fn event_type_serializes_canonically() {
        let json = serde_json::to_string(&EventType::TeamAction).unwrap();
        assert_eq!(json, "\"TEAM_ACTION\"");
        assert_eq!(EventType::TeamAction.as_str(), "TEAM_ACTION");
    }

    #[test]
    fn synthetic_participant_inherits_batch_config() {
        let batch = spec(2).into_batch().unwrap();
        let participant = Participant::synthetic(&batch, 1);
        assert_eq!(participant.batch_id, batch.id);
        assert_eq!(participant.state, ParticipantState::Pending);
        assert_eq!(participant.llm_config, batch.llm_config);
        assert_eq!(participant.ordinal, 1);
    }
}
