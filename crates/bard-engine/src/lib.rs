//! Silent Bard engine
//!
//! Runs synthetic participants through story sessions:
//! - [`TeamProtocol`] sequences proposer and critic into one committed action
//! - [`SessionExecutor`] drives one participant from INIT to COMPLETE or EXCLUDED
//! - [`JobQueue`] holds creation and execution jobs with deterministic ids
//! - [`Orchestrator`] expands batches and maintains batch counters
//! - [`WorkerPool`] processes jobs concurrently, one session per worker
//!
//! # Example
//!
//! ```rust,ignore
//! use bard_engine::{JobQueue, Orchestrator, SessionExecutor, WorkerPool};
//!
//! let executor = Arc::new(SessionExecutor::new(store.clone(), gateway, plugins, config.executor));
//! let orchestrator = Arc::new(Orchestrator::new(store, Arc::new(JobQueue::new()), executor, config.queue));
//! let batch = orchestrator.submit_batch(spec).await?;
//! let counts = WorkerPool::new(orchestrator.clone()).run_until_idle().await;
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod queue;
pub mod team;
pub mod telemetry;
pub mod worker;

pub use error::{ExecutorError, OrchestratorError, QueueError};
pub use executor::{CompletionReason, SessionExecutor, SessionObserver, SessionOutcome};
pub use orchestrator::{BatchReport, ExecuteResult, JobDisposition, Orchestrator};
pub use queue::{
    create_job_id, execute_job_id, EnqueueOutcome, FailOutcome, Job, JobCounts, JobLease,
    JobPayload, JobQueue, JobStatus, QueueSnapshot,
};
pub use team::{RoundError, RoundPhase, TeamProtocol, TeamRound, TokenUsage};
pub use worker::{WorkerHandle, WorkerPool};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
