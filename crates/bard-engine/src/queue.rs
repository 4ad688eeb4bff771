//! Durable job queue
//!
//! Jobs carry deterministic ids so re-enqueueing the same work is a no-op:
//! - `create-batch-<batchId>` expands a batch into participants
//! - `execute-<participantId>` runs one participant's session
//!
//! Failed attempts are retried per the job's [`RetryPolicy`] with backoff.
//! Jobs of a paused batch are parked and do not consume attempts. The whole
//! queue can be snapshotted to JSON and restored after a restart; jobs that
//! were in flight come back as waiting.

use crate::error::QueueError;
use bard_core::{BatchId, ParticipantId, RetryPolicy};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Work a job performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Expand a batch into participants
    CreateBatch {
        /// Batch to expand
        batch_id: BatchId,
    },
    /// Run one participant's session
    Execute {
        /// Owning batch
        batch_id: BatchId,
        /// Participant to run
        participant_id: ParticipantId,
    },
}

impl JobPayload {
    /// Deterministic id for this work
    #[must_use]
    pub fn job_id(&self) -> String {
        match self {
            Self::CreateBatch { batch_id } => create_job_id(*batch_id),
            Self::Execute { participant_id, .. } => execute_job_id(*participant_id),
        }
    }

    /// Stable kind label
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateBatch { .. } => "create_batch",
            Self::Execute { .. } => "execute",
        }
    }

    /// Batch the job belongs to
    #[must_use]
    pub fn batch_id(&self) -> BatchId {
        match self {
            Self::CreateBatch { batch_id } | Self::Execute { batch_id, .. } => *batch_id,
        }
    }
}

/// Id of a batch's creation job
#[must_use]
pub fn create_job_id(batch_id: BatchId) -> String {
    format!("create-batch-{batch_id}")
}

/// Id of a participant's execution job
#[must_use]
pub fn execute_job_id(participant_id: ParticipantId) -> String {
    format!("execute-{participant_id}")
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Ready to run
    Waiting,
    /// Waiting out a retry backoff
    Delayed,
    /// Leased by a worker
    Active,
    /// Held until its batch resumes
    Parked,
    /// Finished successfully
    Completed,
    /// Exhausted its retries
    Failed,
}

impl JobStatus {
    /// Stable name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Parked => "parked",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A queued job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Deterministic id
    pub id: String,
    /// Work to perform
    pub payload: JobPayload,
    /// Retry policy chosen at enqueue time
    pub policy: RetryPolicy,
    /// Current status
    pub status: JobStatus,
    /// Attempts started so far
    pub attempts_made: u32,
    /// Error of the most recent failed attempt
    pub last_error: Option<String>,
    #[serde(skip)]
    ready_at: Option<Instant>,
}

/// Work handed to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct JobLease {
    /// Job id
    pub id: String,
    /// Work to perform
    pub payload: JobPayload,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Result of [`JobQueue::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New job added
    Enqueued,
    /// A job with this id already exists
    Duplicate(JobStatus),
}

/// Result of [`JobQueue::fail`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt
    Retrying {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Retries exhausted
    Failed,
}

/// Job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Ready to run
    pub waiting: usize,
    /// In backoff
    pub delayed: usize,
    /// Leased
    pub active: usize,
    /// Held for a paused batch
    pub parked: usize,
    /// Finished
    pub completed: usize,
    /// Retries exhausted
    pub failed: usize,
}

/// Serializable queue contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Jobs in enqueue order
    pub jobs: Vec<Job>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: IndexMap<String, Job>,
    ready: VecDeque<String>,
    closed: bool,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        for job in self.jobs.values_mut() {
            if job.status == JobStatus::Delayed && job.ready_at.map_or(true, |at| at <= now) {
                job.status = JobStatus::Waiting;
                job.ready_at = None;
                self.ready.push_back(job.id.clone());
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Delayed)
            .filter_map(|j| j.ready_at)
            .min()
    }

    fn active(&mut self, id: &str) -> Result<&mut Job, QueueError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::UnknownJob(id.to_string()))?;
        if job.status != JobStatus::Active {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                status: job.status.as_str().to_string(),
                expected: "active",
            });
        }
        Ok(job)
    }
}

/// In-process job queue shared by the worker pool
#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job unless one with the same id exists. A failed job is replaced.
    pub fn enqueue(&self, payload: JobPayload, policy: RetryPolicy) -> EnqueueOutcome {
        let id = payload.job_id();
        let mut state = self.state.lock();
        if let Some(existing) = state.jobs.get(&id) {
            if existing.status != JobStatus::Failed {
                tracing::debug!(job_id = %id, status = existing.status.as_str(), "duplicate enqueue ignored");
                return EnqueueOutcome::Duplicate(existing.status);
            }
        }
        state.jobs.insert(
            id.clone(),
            Job {
                id: id.clone(),
                payload,
                policy,
                status: JobStatus::Waiting,
                attempts_made: 0,
                last_error: None,
                ready_at: None,
            },
        );
        state.ready.push_back(id);
        drop(state);
        self.notify.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Lease the next ready job, if any
    pub fn dequeue(&self) -> Option<JobLease> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        while let Some(id) = state.ready.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Waiting {
                continue;
            }
            job.status = JobStatus::Active;
            job.attempts_made += 1;
            return Some(JobLease {
                id,
                payload: job.payload.clone(),
                attempt: job.attempts_made,
            });
        }
        None
    }

    /// Wait for the next job. Returns `None` once the queue is closed.
    pub async fn next(&self, poll: Duration) -> Option<JobLease> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.dequeue() {
                return Some(lease);
            }
            let wait = {
                let state = self.state.lock();
                if state.closed {
                    return None;
                }
                state
                    .next_due()
                    .map_or(poll, |due| due.saturating_duration_since(Instant::now()).min(poll))
            };
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Mark a leased job finished
    ///
    /// # Errors
    /// Unknown job or job not active.
    pub fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let job = state.active(id)?;
        job.status = JobStatus::Completed;
        job.last_error = None;
        Ok(())
    }

    /// Record a failed attempt; schedules a retry while the policy allows
    ///
    /// # Errors
    /// Unknown job or job not active.
    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<FailOutcome, QueueError> {
        let mut state = self.state.lock();
        let job = state.active(id)?;
        job.last_error = Some(error.into());
        if job.policy.allows_retry(job.attempts_made) {
            let delay = job.policy.delay_for(job.attempts_made);
            job.status = JobStatus::Delayed;
            job.ready_at = Some(Instant::now() + delay);
            drop(state);
            self.notify.notify_one();
            Ok(FailOutcome::Retrying { delay })
        } else {
            job.status = JobStatus::Failed;
            Ok(FailOutcome::Failed)
        }
    }

    /// Mark a leased job failed without further retries
    ///
    /// # Errors
    /// Unknown job or job not active.
    pub fn fail_permanently(&self, id: &str, error: impl Into<String>) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let job = state.active(id)?;
        job.last_error = Some(error.into());
        job.status = JobStatus::Failed;
        Ok(())
    }

    /// Hold a leased job until its batch resumes; the attempt is not counted
    ///
    /// # Errors
    /// Unknown job or job not active.
    pub fn park(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let job = state.active(id)?;
        job.status = JobStatus::Parked;
        job.attempts_made = job.attempts_made.saturating_sub(1);
        Ok(())
    }

    /// Release every parked job of a batch. Returns how many were released.
    pub fn unpark_batch(&self, batch_id: BatchId) -> usize {
        let mut state = self.state.lock();
        let ids: Vec<String> = state
            .jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Parked && j.payload.batch_id() == batch_id)
            .map(|j| {
                j.status = JobStatus::Waiting;
                j.id.clone()
            })
            .collect();
        let released = ids.len();
        state.ready.extend(ids);
        drop(state);
        if released > 0 {
            self.notify.notify_waiters();
        }
        released
    }

    /// Look up a job
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Job> {
        self.state.lock().jobs.get(id).cloned()
    }

    /// Counts by status
    #[must_use]
    pub fn job_counts(&self) -> JobCounts {
        let state = self.state.lock();
        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Delayed => counts.delayed += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Parked => counts.parked += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Jobs whose retries are exhausted
    #[must_use]
    pub fn failed_jobs(&self) -> Vec<Job> {
        self.state
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Failed)
            .cloned()
            .collect()
    }

    /// No job is waiting, delayed or leased. Parked jobs do not count.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let counts = self.job_counts();
        counts.waiting == 0 && counts.delayed == 0 && counts.active == 0
    }

    /// Stop handing out jobs; waiting workers return `None`
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Copy of the queue contents
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.state.lock().jobs.values().cloned().collect(),
        }
    }

    /// Rebuild a queue from a snapshot. Leased and delayed jobs become waiting.
    #[must_use]
    pub fn restore(snapshot: QueueSnapshot) -> Self {
        let mut state = QueueState::default();
        for mut job in snapshot.jobs {
            if matches!(job.status, JobStatus::Active | JobStatus::Delayed) {
                job.status = JobStatus::Waiting;
            }
            job.ready_at = None;
            if job.status == JobStatus::Waiting {
                state.ready.push_back(job.id.clone());
            }
            state.jobs.insert(job.id.clone(), job);
        }
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
        }
    }

    /// Write the snapshot as JSON
    ///
    /// # Errors
    /// Serialization or I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), QueueError> {
        let snapshot_error = |message: String| QueueError::Snapshot {
            path: path.to_path_buf(),
            message,
        };
        let json = serde_json::to_vec_pretty(&self.snapshot()).map_err(|e| snapshot_error(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| snapshot_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), "queue snapshot written");
        Ok(())
    }

    /// Load a queue saved with [`JobQueue::save`]
    ///
    /// # Errors
    /// I/O or parse failure.
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        let snapshot_error = |message: String| QueueError::Snapshot {
            path: path.to_path_buf(),
            message,
        };
        let bytes = std::fs::read(path).map_err(|e| snapshot_error(e.to_string()))?;
        let snapshot: QueueSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| snapshot_error(e.to_string()))?;
        Ok(Self::restore(snapshot))
    }
}
