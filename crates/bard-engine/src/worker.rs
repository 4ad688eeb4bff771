//! Worker pool
//!
//! Each worker leases one job at a time, so a participant's session loop is
//! strictly sequential while many participants run concurrently.

use crate::orchestrator::Orchestrator;
use crate::queue::{JobCounts, JobLease, JobQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Fixed-size pool of queue workers
pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    workers: usize,
    poll: Duration,
}

/// Running pool started with [`WorkerPool::spawn`]
pub struct WorkerHandle {
    queue: Arc<JobQueue>,
    tasks: JoinSet<()>,
}

impl WorkerHandle {
    /// Close the queue and wait for every worker to finish its current job
    pub async fn shutdown(mut self) {
        self.queue.close();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "worker task panicked");
            }
        }
    }
}

impl WorkerPool {
    /// Pool sized from the orchestrator's queue settings
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let settings = orchestrator.settings();
        let workers = settings.workers.max(1);
        let poll = settings.poll_interval();
        Self {
            orchestrator,
            workers,
            poll,
        }
    }

    /// Override the worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Process jobs until nothing is waiting, delayed or running.
    /// Parked jobs stay parked. Returns the final queue counts.
    pub async fn run_until_idle(&self) -> JobCounts {
        let mut tasks = JoinSet::new();
        for worker in 0..self.workers {
            let orchestrator = self.orchestrator.clone();
            let poll = self.poll;
            tasks.spawn(async move {
                let queue = orchestrator.queue().clone();
                loop {
                    if let Some(lease) = queue.dequeue() {
                        process(&orchestrator, worker, lease).await;
                        continue;
                    }
                    if queue.is_idle() {
                        break;
                    }
                    tokio::time::sleep(poll).await;
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "worker task panicked");
            }
        }
        self.orchestrator.queue().job_counts()
    }

    /// Start long-running workers that wait for jobs until shut down
    #[must_use]
    pub fn spawn(&self) -> WorkerHandle {
        let mut tasks = JoinSet::new();
        for worker in 0..self.workers {
            let orchestrator = self.orchestrator.clone();
            let poll = self.poll;
            tasks.spawn(async move {
                let queue = orchestrator.queue().clone();
                while let Some(lease) = queue.next(poll).await {
                    process(&orchestrator, worker, lease).await;
                }
                tracing::debug!(worker, "worker stopped");
            });
        }
        WorkerHandle {
            queue: self.orchestrator.queue().clone(),
            tasks,
        }
    }
}

/// Handle one lease on its own task so a panicking handler still settles
/// the job instead of leaving it leased forever.
async fn process(orchestrator: &Arc<Orchestrator>, worker: usize, lease: JobLease) {
    let job_id = lease.id.clone();
    let handler = Arc::clone(orchestrator);
    match tokio::spawn(async move { handler.process_job(lease).await }).await {
        Ok(Ok(disposition)) => tracing::debug!(worker, %job_id, ?disposition, "job settled"),
        Ok(Err(error)) => tracing::error!(worker, %job_id, %error, "job bookkeeping failed"),
        Err(error) => {
            tracing::error!(worker, %job_id, %error, "job handler panicked");
            match orchestrator.queue().fail(&job_id, format!("job handler panicked: {error}")) {
                Ok(outcome) => tracing::warn!(worker, %job_id, ?outcome, "panicked job settled"),
                Err(error) => tracing::error!(worker, %job_id, %error, "could not settle panicked job"),
            }
        }
    }
}
