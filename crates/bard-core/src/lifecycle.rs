//! Participant and batch lifecycle tables.

use crate::entities::{BatchStatus, ParticipantState};
use crate::error::TransitionError;

/// States a participant may move to from `from`.
#[must_use]
pub fn allowed_participant_transitions(from: ParticipantState) -> Vec<ParticipantState> {
    use ParticipantState::*;
    match from {
        Pending => vec![Active],
        Active => vec![Complete, Excluded],
        Complete | Excluded => vec![],
    }
}

/// Validates a participant state transition.
///
/// # Errors
/// `TransitionError::Participant` when `to` is not reachable from `from`.
pub fn validate_participant_transition(
    from: ParticipantState,
    to: ParticipantState,
) -> Result<(), TransitionError> {
    if allowed_participant_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Participant { from, to })
    }
}

/// Statuses a batch may move to from `from`.
#[must_use]
pub fn allowed_batch_transitions(from: BatchStatus) -> Vec<BatchStatus> {
    use BatchStatus::*;
    match from {
        Queued => vec![Running, Paused, Failed],
        Running => vec![Paused, Complete, Failed],
        Paused => vec![Running, Failed],
        Complete | Failed => vec![],
    }
}

/// Validates a batch status transition. Re-asserting the current non-terminal
/// status is accepted so that creation jobs can be replayed.
///
/// # Errors
/// `TransitionError::Batch` when `to` is not reachable from `from`.
pub fn validate_batch_transition(from: BatchStatus, to: BatchStatus) -> Result<(), TransitionError> {
    if (from == to && !from.is_terminal()) || allowed_batch_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Batch { from, to })
    }
}
