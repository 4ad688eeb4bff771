//! Persistence store capability
//!
//! The relational store is an external collaborator; the engine only needs
//! record-level create/read/update plus two lookups ("participants for batch Y",
//! "events for participant X"). [`InMemoryStore`] backs tests and the CLI.
//!
//! All writes are single-record upserts. Batch counters are bumped with an
//! atomic increment under the record lock, never read-modify-write by callers.

use crate::entities::{
    Batch, BatchCounter, BatchStatus, Event, Participant, ParticipantState,
};
use crate::error::StoreError;
use crate::lifecycle::{validate_batch_transition, validate_participant_transition};
use crate::types::{BatchId, ParticipantId};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// Record-level access to batches, participants and events
#[async_trait]
pub trait StudyStore: Send + Sync {
    /// Insert a new batch
    async fn create_batch(&self, batch: Batch) -> Result<(), StoreError>;

    /// Fetch a batch
    async fn get_batch(&self, id: BatchId) -> Result<Batch, StoreError>;

    /// Move a batch to a new status, enforcing the lifecycle table
    async fn set_batch_status(&self, id: BatchId, status: BatchStatus) -> Result<Batch, StoreError>;

    /// Atomically bump one counter, enforcing `completed <= created <= actor_count`
    async fn increment_batch_counter(
        &self,
        id: BatchId,
        counter: BatchCounter,
    ) -> Result<Batch, StoreError>;

    /// Insert a new participant
    async fn create_participant(&self, participant: Participant) -> Result<(), StoreError>;

    /// Fetch a participant
    async fn get_participant(&self, id: ParticipantId) -> Result<Participant, StoreError>;

    /// Upsert a participant record
    async fn update_participant(&self, participant: Participant) -> Result<(), StoreError>;

    /// Participants of a batch, ordered by ordinal
    async fn participants_for_batch(&self, batch_id: BatchId) -> Result<Vec<Participant>, StoreError>;

    /// Append an event; returns it with its assigned sequence number
    async fn append_event(&self, event: Event) -> Result<Event, StoreError>;

    /// Events of a participant, ordered by sequence
    async fn events_for_participant(&self, id: ParticipantId) -> Result<Vec<Event>, StoreError>;

    /// Move a participant to a new state, stamping `completed_at` on terminal states
    async fn transition_participant(
        &self,
        id: ParticipantId,
        to: ParticipantState,
        reason: Option<String>,
    ) -> Result<Participant, StoreError> {
        let mut participant = self.get_participant(id).await?;
        validate_participant_transition(participant.state, to)?;
        participant.state = to;
        if to.is_terminal() {
            participant.completed_at = Some(Utc::now());
        }
        if to == ParticipantState::Excluded {
            participant.exclusion_reason = reason;
        }
        self.update_participant(participant.clone()).await?;
        tracing::debug!(participant_id = %id, state = ?to, "participant transitioned");
        Ok(participant)
    }

    /// Set mutual partner references for a paired team session
    async fn pair_participants(&self, a: ParticipantId, b: ParticipantId) -> Result<(), StoreError> {
        if a == b {
            return Err(StoreError::Duplicate(format!("cannot pair {a} with itself")));
        }
        let mut first = self.get_participant(a).await?;
        let mut second = self.get_participant(b).await?;
        first.partner_id = Some(b);
        second.partner_id = Some(a);
        self.update_participant(first).await?;
        self.update_participant(second).await
    }
}

/// In-process store backed by concurrent maps
#[derive(Debug, Default)]
pub struct InMemoryStore {
    batches: DashMap<BatchId, Batch>,
    participants: DashMap<ParticipantId, Participant>,
    events: DashMap<ParticipantId, Vec<Event>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all participants
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl StudyStore for InMemoryStore {
    async fn create_batch(&self, batch: Batch) -> Result<(), StoreError> {
        if self.batches.contains_key(&batch.id) {
            return Err(StoreError::Duplicate(format!("batch {}", batch.id)));
        }
        self.batches.insert(batch.id, batch);
        Ok(())
    }

    async fn get_batch(&self, id: BatchId) -> Result<Batch, StoreError> {
        self.batches
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::BatchNotFound(id))
    }

    async fn set_batch_status(&self, id: BatchId, status: BatchStatus) -> Result<Batch, StoreError> {
        let mut batch = self.batches.get_mut(&id).ok_or(StoreError::BatchNotFound(id))?;
        validate_batch_transition(batch.status, status)?;
        batch.status = status;
        batch.updated_at = Utc::now();
        Ok(batch.clone())
    }

    async fn increment_batch_counter(
        &self,
        id: BatchId,
        counter: BatchCounter,
    ) -> Result<Batch, StoreError> {
        // get_mut holds the shard lock for the whole check-and-bump
        let mut batch = self.batches.get_mut(&id).ok_or(StoreError::BatchNotFound(id))?;
        if batch.status.is_terminal() {
            return Err(StoreError::CounterInvariant {
                batch_id: id,
                detail: format!("batch is {:?}", batch.status),
            });
        }
        match counter {
            BatchCounter::Created => {
                if batch.actors_created >= batch.actor_count {
                    return Err(StoreError::CounterInvariant {
                        batch_id: id,
                        detail: format!("actorsCreated already {}", batch.actor_count),
                    });
                }
                batch.actors_created += 1;
            }
            BatchCounter::Completed => {
                if batch.actors_completed >= batch.actors_created {
                    return Err(StoreError::CounterInvariant {
                        batch_id: id,
                        detail: "actorsCompleted would exceed actorsCreated".into(),
                    });
                }
                batch.actors_completed += 1;
            }
        }
        batch.updated_at = Utc::now();
        Ok(batch.clone())
    }

    async fn create_participant(&self, participant: Participant) -> Result<(), StoreError> {
        if !self.batches.contains_key(&participant.batch_id) {
            return Err(StoreError::BatchNotFound(participant.batch_id));
        }
        if self.participants.contains_key(&participant.id) {
            return Err(StoreError::Duplicate(format!("participant {}", participant.id)));
        }
        self.participants.insert(participant.id, participant);
        Ok(())
    }

    async fn get_participant(&self, id: ParticipantId) -> Result<Participant, StoreError> {
        self.participants
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or(StoreError::ParticipantNotFound(id))
    }

    async fn update_participant(&self, participant: Participant) -> Result<(), StoreError> {
        self.participants.insert(participant.id, participant);
        Ok(())
    }

    async fn participants_for_batch(&self, batch_id: BatchId) -> Result<Vec<Participant>, StoreError> {
        let mut found: Vec<Participant> = self
            .participants
            .iter()
            .filter(|entry| entry.value().batch_id == batch_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|p| p.ordinal);
        Ok(found)
    }

    async fn append_event(&self, mut event: Event) -> Result<Event, StoreError> {
        let mut stream = self.events.entry(event.participant_id).or_default();
        if stream.iter().any(|e| e.id == event.id) {
            return Err(StoreError::EventExists(event.id));
        }
        event.sequence = stream.last().map_or(1, |last| last.sequence + 1);
        stream.push(event.clone());
        Ok(event)
    }

    async fn events_for_participant(&self, id: ParticipantId) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .events
            .get(&id)
            .map(|stream| stream.value().clone())
            .unwrap_or_default())
    }
}
