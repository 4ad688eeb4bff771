//! Error types for Silent Bard core
//!
//! Covers:
//! - Persistence store failures
//! - Illegal lifecycle transitions
//! - Configuration loading and validation

use crate::entities::{BatchStatus, ParticipantState};
use crate::types::{BatchId, EventId, ParticipantId};
use std::path::PathBuf;

/// Main core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Persistence store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Illegal lifecycle transition
    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),

    /// Configuration file could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Semantically invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Persistence store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Batch missing
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// Participant missing
    #[error("participant not found: {0}")]
    ParticipantNotFound(ParticipantId),

    /// Record with this key already exists
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// Events are immutable once written
    #[error("event {0} already recorded")]
    EventExists(EventId),

    /// A counter update would break `completed <= created <= requested`
    #[error("counter invariant violated on batch {batch_id}: {detail}")]
    CounterInvariant {
        /// Batch whose counters were touched
        batch_id: BatchId,
        /// What would have been violated
        detail: String,
    },

    /// Lifecycle rules rejected the update
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Backend unavailable (network, pool exhaustion, ...)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transient failures are worth a queue-level retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Illegal lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Participant transition not in the allowed table
    #[error("illegal participant transition {from:?} -> {to:?}")]
    Participant {
        /// Current state
        from: ParticipantState,
        /// Requested state
        to: ParticipantState,
    },

    /// Batch transition not in the allowed table
    #[error("illegal batch transition {from:?} -> {to:?}")]
    Batch {
        /// Current status
        from: BatchStatus,
        /// Requested status
        to: BatchStatus,
    },
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("parse error in {path}: {source}")]
    Toml {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// JSON syntax or schema error
    #[error("parse error in {path}: {source}")]
    Json {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Environment override could not be parsed
    #[error("invalid value for {var}: {value}")]
    Env {
        /// Variable name
        var: String,
        /// Raw value
        value: String,
    },
}

impl ConfigError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_retryability() {
        assert!(StoreError::Unavailable("pool".into()).is_retryable());
        assert!(!StoreError::BatchNotFound(BatchId::new()).is_retryable());
    }

    #[test]
    fn transition_error_display() {
        let err = TransitionError::Participant {
            from: ParticipantState::Complete,
            to: ParticipantState::Active,
        };
        assert!(err.to_string().contains("Complete -> Active"));
    }
}
