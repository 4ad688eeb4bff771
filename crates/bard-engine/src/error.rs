//! Engine error types

use bard_core::{CoreError, ParticipantId, ParticipantState, StoreError};
use std::path::PathBuf;

/// Failures that escape the session executor.
///
/// Plugin and gateway failures never appear here; they become a terminal
/// participant state plus an ERROR or TIMEOUT event.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Participant cannot be run from its current state
    #[error("participant {participant_id} is {state:?} and cannot be executed")]
    NotRunnable {
        /// Participant
        participant_id: ParticipantId,
        /// Observed state
        state: ParticipantState,
    },
}

impl ExecutorError {
    /// Whether the job should be retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::NotRunnable { .. } => false,
        }
    }
}

/// Job queue failures
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No job with this id
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// Job is not in a state that allows the operation
    #[error("job {id} is {status}, expected {expected}")]
    InvalidState {
        /// Job id
        id: String,
        /// Current status
        status: String,
        /// Required status
        expected: &'static str,
    },

    /// Snapshot could not be read or written
    #[error("snapshot {path}: {message}")]
    Snapshot {
        /// Snapshot file
        path: PathBuf,
        /// Cause
        message: String,
    },
}

/// Orchestrator failures
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Invalid batch specification
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Session executor failure
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Queue failure
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl OrchestratorError {
    /// Whether the job that hit this error should be retried
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(_) | Self::Queue(_) => false,
            Self::Store(e) => e.is_retryable(),
            Self::Executor(e) => e.is_retryable(),
        }
    }
}
