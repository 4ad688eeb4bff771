//! Job queue orchestrator
//!
//! Turns batch submissions into queued work and processes leased jobs:
//! - batch creation expands a batch into PENDING participants and enqueues one
//!   execution job per participant under its deterministic id
//! - session execution runs the executor and maintains the batch counters
//! - pause parks execution jobs; resume releases them
//! - recovery re-enqueues PENDING/ACTIVE participants after a crash

use crate::error::OrchestratorError;
use crate::executor::{SessionExecutor, SessionOutcome};
use crate::queue::{EnqueueOutcome, FailOutcome, JobCounts, JobLease, JobPayload, JobQueue};
use bard_core::{
    ActorType, Batch, BatchCounter, BatchId, BatchSpec, BatchStatus, Participant, ParticipantId,
    ParticipantState, QueueSettings, StoreError, StudyStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What happened to a leased job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Work done
    Completed,
    /// Held until the batch resumes
    Parked,
    /// Scheduled for another attempt
    Retrying {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// No further attempts
    Failed,
}

impl JobDisposition {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Parked => "parked",
            Self::Retrying { .. } => "retrying",
            Self::Failed => "failed",
        }
    }
}

/// Result of handling one execution job
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    /// Executor ran; the outcome says how far
    Ran(SessionOutcome),
    /// Batch is paused; the job should be parked
    Deferred,
    /// Batch already finished; nothing to do
    Skipped,
}

/// Participant counts by state plus queue counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Batch record
    pub batch: Batch,
    /// Never executed
    pub pending: u32,
    /// Held by an executor or paused mid-session
    pub active: u32,
    /// Finished normally
    pub complete: u32,
    /// Excluded
    pub excluded: u32,
    /// Queue state at report time
    pub jobs: JobCounts,
}

/// Schedules and processes batch work
pub struct Orchestrator {
    store: Arc<dyn StudyStore>,
    queue: Arc<JobQueue>,
    executor: Arc<SessionExecutor>,
    settings: QueueSettings,
}

impl Orchestrator {
    /// Orchestrator over a store, queue and executor
    #[must_use]
    pub fn new(
        store: Arc<dyn StudyStore>,
        queue: Arc<JobQueue>,
        executor: Arc<SessionExecutor>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            store,
            queue,
            executor,
            settings,
        }
    }

    /// Shared queue
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Shared store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StudyStore> {
        &self.store
    }

    /// Queue settings in effect
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Validate and persist a batch, then enqueue its creation job
    ///
    /// # Errors
    /// Invalid specification or store failure.
    pub async fn submit_batch(&self, spec: BatchSpec) -> Result<Batch, OrchestratorError> {
        let batch = spec.into_batch()?;
        self.store.create_batch(batch.clone()).await?;
        self.queue.enqueue(
            JobPayload::CreateBatch { batch_id: batch.id },
            self.settings.create_retry,
        );
        tracing::info!(
            batch_id = %batch.id,
            study_id = %batch.study_id,
            actors = batch.actor_count,
            plugin = %batch.task_config.plugin_type,
            team_mode = batch.task_config.team_mode,
            "batch submitted"
        );
        Ok(batch)
    }

    /// Create the batch's missing participants and enqueue their sessions.
    /// Safe to replay: existing participants are kept and only missing
    /// ordinals are created. Returns how many execution jobs were enqueued.
    ///
    /// # Errors
    /// Store failure.
    pub async fn handle_create_batch(&self, batch_id: BatchId) -> Result<usize, OrchestratorError> {
        let mut batch = self.store.get_batch(batch_id).await?;
        if batch.status.is_terminal() {
            tracing::debug!(%batch_id, status = ?batch.status, "batch finished, nothing to create");
            return Ok(0);
        }
        if batch.status == BatchStatus::Queued {
            batch = self.store.set_batch_status(batch_id, BatchStatus::Running).await?;
        }

        let mut participants = self.store.participants_for_batch(batch_id).await?;
        for ordinal in 0..batch.actor_count {
            if participants.iter().any(|p| p.ordinal == ordinal) {
                continue;
            }
            let participant = Participant::synthetic(&batch, ordinal);
            self.store.create_participant(participant.clone()).await?;
            participants.push(participant);
        }
        participants.sort_by_key(|p| p.ordinal);

        // A replay after a crash may find participants whose counter bump was lost
        let created = u32::try_from(participants.len()).unwrap_or(u32::MAX);
        while batch.actors_created < created.min(batch.actor_count) {
            batch = self
                .store
                .increment_batch_counter(batch_id, BatchCounter::Created)
                .await?;
        }

        if batch.task_config.pair_participants {
            self.pair(&mut participants).await?;
        }

        let mut enqueued = 0;
        for participant in &participants {
            if participant.actor_type == ActorType::Human || participant.state.is_terminal() {
                continue;
            }
            if self.enqueue_execute(batch_id, participant.id) == EnqueueOutcome::Enqueued {
                enqueued += 1;
            }
        }
        tracing::info!(%batch_id, created = batch.actors_created, enqueued, "batch participants ready");
        Ok(enqueued)
    }

    async fn pair(&self, participants: &mut [Participant]) -> Result<(), OrchestratorError> {
        for pair in participants.chunks_mut(2) {
            let [a, b] = pair else {
                continue;
            };
            if a.partner_id.is_some() || b.partner_id.is_some() {
                continue;
            }
            self.store.pair_participants(a.id, b.id).await?;
            a.partner_id = Some(b.id);
            b.partner_id = Some(a.id);
            tracing::debug!(a = %a.id, b = %b.id, "participants paired");
        }
        Ok(())
    }

    fn enqueue_execute(&self, batch_id: BatchId, participant_id: ParticipantId) -> EnqueueOutcome {
        self.queue.enqueue(
            JobPayload::Execute {
                batch_id,
                participant_id,
            },
            self.settings.execute_retry,
        )
    }

    /// Run one participant's session and maintain the batch counters
    ///
    /// # Errors
    /// Store or executor failure.
    pub async fn handle_execute(
        &self,
        batch_id: BatchId,
        participant_id: ParticipantId,
    ) -> Result<ExecuteResult, OrchestratorError> {
        let batch = self.store.get_batch(batch_id).await?;
        match batch.status {
            BatchStatus::Paused => return Ok(ExecuteResult::Deferred),
            BatchStatus::Complete | BatchStatus::Failed => return Ok(ExecuteResult::Skipped),
            BatchStatus::Queued | BatchStatus::Running => {}
        }

        let outcome = self.executor.run(participant_id).await?;
        if let SessionOutcome::Paused { .. } = outcome {
            return Ok(ExecuteResult::Deferred);
        }
        if outcome.finished_now() {
            let batch = self
                .store
                .increment_batch_counter(batch_id, BatchCounter::Completed)
                .await?;
            self.complete_if_finished(&batch).await?;
        } else if let SessionOutcome::AlreadyFinished(_) = outcome {
            // An earlier attempt finished the session but lost its counter bump
            self.reconcile_completed(batch_id).await?;
        }
        Ok(ExecuteResult::Ran(outcome))
    }

    /// Raise `actorsCompleted` to the number of terminal participants and
    /// complete the batch if that finishes it.
    async fn reconcile_completed(&self, batch_id: BatchId) -> Result<Batch, OrchestratorError> {
        let terminal = self
            .store
            .participants_for_batch(batch_id)
            .await?
            .iter()
            .filter(|p| p.state.is_terminal())
            .count();
        let terminal = u32::try_from(terminal).unwrap_or(u32::MAX);
        let mut batch = self.store.get_batch(batch_id).await?;
        while batch.actors_completed < terminal && !batch.status.is_terminal() {
            match self
                .store
                .increment_batch_counter(batch_id, BatchCounter::Completed)
                .await
            {
                Ok(updated) => batch = updated,
                // A concurrent job already counted the rest
                Err(StoreError::CounterInvariant { .. }) => {
                    batch = self.store.get_batch(batch_id).await?;
                    break;
                }
                Err(error) => return Err(error.into()),
            }
            tracing::debug!(%batch_id, completed = batch.actors_completed, terminal, "completed counter reconciled");
        }
        self.complete_if_finished(&batch).await
    }

    async fn complete_if_finished(&self, batch: &Batch) -> Result<Batch, OrchestratorError> {
        if batch.all_finished() && batch.status == BatchStatus::Running {
            let completed = self.store.set_batch_status(batch.id, BatchStatus::Complete).await?;
            tracing::info!(batch_id = %batch.id, completed = batch.actors_completed, "batch complete");
            return Ok(completed);
        }
        Ok(batch.clone())
    }

    /// Handle a leased job and settle it in the queue
    ///
    /// # Errors
    /// Queue bookkeeping failure. Handler failures are settled as retries or
    /// failed jobs instead.
    #[tracing::instrument(skip(self, lease), fields(job_id = %lease.id, attempt = lease.attempt))]
    pub async fn process_job(&self, lease: JobLease) -> Result<JobDisposition, OrchestratorError> {
        let handled = match &lease.payload {
            JobPayload::CreateBatch { batch_id } => {
                self.handle_create_batch(*batch_id).await.map(|_| JobDisposition::Completed)
            }
            JobPayload::Execute {
                batch_id,
                participant_id,
            } => self
                .handle_execute(*batch_id, *participant_id)
                .await
                .map(|result| match result {
                    ExecuteResult::Deferred => JobDisposition::Parked,
                    ExecuteResult::Ran(_) | ExecuteResult::Skipped => JobDisposition::Completed,
                }),
        };

        let disposition = match handled {
            Ok(JobDisposition::Parked) => {
                self.queue.park(&lease.id)?;
                JobDisposition::Parked
            }
            Ok(_) => {
                self.queue.complete(&lease.id)?;
                JobDisposition::Completed
            }
            Err(error) => {
                tracing::warn!(%error, "job attempt failed");
                let outcome = if error.is_retryable() {
                    self.queue.fail(&lease.id, error.to_string())?
                } else {
                    self.queue.fail_permanently(&lease.id, error.to_string())?;
                    FailOutcome::Failed
                };
                match outcome {
                    FailOutcome::Retrying { delay } => JobDisposition::Retrying { delay },
                    FailOutcome::Failed => {
                        tracing::error!(%error, "job failed permanently");
                        if let JobPayload::CreateBatch { batch_id } = &lease.payload {
                            self.fail_batch(*batch_id).await;
                        }
                        JobDisposition::Failed
                    }
                }
            }
        };

        metrics::counter!(
            "bard_jobs_total",
            "kind" => lease.payload.kind(),
            "outcome" => disposition.as_str()
        )
        .increment(1);

        if let Some(path) = &self.settings.snapshot_path {
            if let Err(error) = self.queue.save(path) {
                tracing::warn!(%error, "queue snapshot failed");
            }
        }
        Ok(disposition)
    }

    async fn fail_batch(&self, batch_id: BatchId) {
        match self.store.set_batch_status(batch_id, BatchStatus::Failed).await {
            Ok(_) => tracing::error!(%batch_id, "batch creation failed, batch marked FAILED"),
            Err(error) => tracing::warn!(%batch_id, %error, "could not mark batch FAILED"),
        }
    }

    /// Stop new sessions of a batch from starting. Running sessions yield at
    /// their next loop iteration.
    ///
    /// # Errors
    /// Unknown batch or illegal transition.
    pub async fn pause_batch(&self, batch_id: BatchId) -> Result<Batch, OrchestratorError> {
        let batch = self.store.set_batch_status(batch_id, BatchStatus::Paused).await?;
        tracing::info!(%batch_id, "batch paused");
        Ok(batch)
    }

    /// Resume a paused batch and release its parked jobs
    ///
    /// # Errors
    /// Unknown batch or illegal transition.
    pub async fn resume_batch(&self, batch_id: BatchId) -> Result<Batch, OrchestratorError> {
        let mut batch = self.store.set_batch_status(batch_id, BatchStatus::Running).await?;
        let released = self.queue.unpark_batch(batch_id);
        if batch.all_finished() {
            batch = self.store.set_batch_status(batch_id, BatchStatus::Complete).await?;
        }
        tracing::info!(%batch_id, released, status = ?batch.status, "batch resumed");
        Ok(batch)
    }

    /// Re-enqueue unfinished work of a batch under the same deterministic ids.
    /// Returns how many jobs were newly enqueued.
    ///
    /// # Errors
    /// Store failure.
    pub async fn recover_batch(&self, batch_id: BatchId) -> Result<usize, OrchestratorError> {
        let batch = self.store.get_batch(batch_id).await?;
        if batch.status.is_terminal() {
            return Ok(0);
        }
        let batch = self.reconcile_completed(batch_id).await?;
        if batch.status.is_terminal() {
            tracing::info!(%batch_id, "batch finished during recovery");
            return Ok(0);
        }
        let mut enqueued = 0;
        if !batch.fully_created() || batch.status == BatchStatus::Queued {
            let outcome = self
                .queue
                .enqueue(JobPayload::CreateBatch { batch_id }, self.settings.create_retry);
            if outcome == EnqueueOutcome::Enqueued {
                enqueued += 1;
            }
        }
        for participant in self.store.participants_for_batch(batch_id).await? {
            let resumable = matches!(
                participant.state,
                ParticipantState::Pending | ParticipantState::Active
            );
            if resumable
                && participant.actor_type == ActorType::Synthetic
                && self.enqueue_execute(batch_id, participant.id) == EnqueueOutcome::Enqueued
            {
                enqueued += 1;
            }
        }
        tracing::info!(%batch_id, enqueued, "batch recovered");
        Ok(enqueued)
    }

    /// Participant and queue counts for a batch
    ///
    /// # Errors
    /// Store failure.
    pub async fn report(&self, batch_id: BatchId) -> Result<BatchReport, OrchestratorError> {
        let batch = self.store.get_batch(batch_id).await?;
        let mut report = BatchReport {
            batch,
            pending: 0,
            active: 0,
            complete: 0,
            excluded: 0,
            jobs: self.queue.job_counts(),
        };
        for participant in self.store.participants_for_batch(batch_id).await? {
            match participant.state {
                ParticipantState::Pending => report.pending += 1,
                ParticipantState::Active => report.active += 1,
                ParticipantState::Complete => report.complete += 1,
                ParticipantState::Excluded => report.excluded += 1,
            }
        }
        Ok(report)
    }
}
