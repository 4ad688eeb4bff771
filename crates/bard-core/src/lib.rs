//! Silent Bard Core
//!
//! Data model and lifecycle rules for synthetic interactive-fiction studies:
//! - Batches expand into participants that each run one story session
//! - Participants move PENDING -> ACTIVE -> COMPLETE | EXCLUDED
//! - Events form the append-only audit trail of every session
//! - [`StudyStore`] abstracts the persistence store
//!
//! # Example
//!
//! ```rust,ignore
//! use bard_core::prelude::*;
//!
//! let batch = BatchSpec { /* ... */ }.into_batch()?;
//! store.create_batch(batch).await?;
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod entities;
pub mod error;
pub mod lifecycle;
pub mod store;
pub mod types;

pub use config::{ExecutorSettings, LlmSettings, LogFormat, LoggingSettings, QueueSettings, RunnerConfig};
pub use entities::{
    ActorType, Batch, BatchCounter, BatchSpec, BatchStatus, Event, EventType, Participant,
    ParticipantState,
};
pub use error::{ConfigError, CoreError, StoreError, TransitionError};
pub use store::{InMemoryStore, StudyStore};
pub use types::{
    Backoff, BatchId, EventId, LlmConfig, ParticipantId, PluginKind, Provider, RetryPolicy, Role,
    StudyId, TaskConfig,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Silent Bard core types
    pub use crate::{
        Batch, BatchId, BatchSpec, BatchStatus, Event, EventType, InMemoryStore, LlmConfig,
        Participant, ParticipantId, ParticipantState, PluginKind, Provider, Role, StudyStore,
        TaskConfig,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
