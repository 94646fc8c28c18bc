//! In-memory job queue with a bounded worker pool.
//!
//! Submissions are recorded as `Queued` and their ids pushed onto an
//! unbounded FIFO channel. A single dispatcher task pops ids in order and
//! admits each one once a pool permit is free, so at most `max_workers`
//! jobs run at a time and admission follows submission order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use geoengine_core::error::CoreError;
use geoengine_core::executor::{ExecutionOutcome, LogLine, LogStream};
use geoengine_core::job::{Job, JobRequest, JobStatus};
use geoengine_core::types::JobId;
use tokio::sync::{mpsc, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use super::runner::JobRunner;

/// Log lines kept per job; older lines are dropped first.
const MAX_LOG_LINES: usize = 1000;

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

pub struct JobQueue {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    pending: mpsc::UnboundedSender<JobId>,
    slots: Arc<Semaphore>,
    max_workers: usize,
    runner: Arc<dyn JobRunner>,
    shutdown: CancellationToken,
}

impl JobQueue {
    /// Create the queue and spawn its dispatcher task.
    pub fn start(max_workers: usize, runner: Arc<dyn JobRunner>) -> Arc<Self> {
        let max_workers = max_workers.max(1);
        let (pending, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            pending,
            slots: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            runner,
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(Arc::clone(&queue).dispatch_loop(rx));
        tracing::info!(max_workers, "Job queue started");
        queue
    }

    /// Validate and enqueue a job.
    pub async fn submit(&self, request: JobRequest) -> Result<Job, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Conflict("Job queue is shutting down".into()));
        }
        self.runner.validate(&request).await?;

        let job = Job::new(&request);
        let id = job.id;
        self.jobs.write().await.insert(
            id,
            JobEntry {
                job: job.clone(),
                cancel: self.shutdown.child_token(),
            },
        );
        if self.pending.send(id).is_err() {
            self.jobs.write().await.remove(&id);
            return Err(CoreError::Conflict("Job queue is shutting down".into()));
        }

        tracing::info!(job_id = %id, worker = %job.worker, "Job submitted");
        Ok(job)
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).map(|e| e.job.clone())
    }

    /// All jobs that have not been deleted, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn running_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|e| e.job.status == JobStatus::Running)
            .count()
    }

    /// Cancel a queued or running job.
    ///
    /// Queued jobs become `Cancelled` immediately. Running jobs are signalled
    /// and become `Cancelled` once their container has been stopped.
    pub async fn cancel(&self, id: JobId) -> Result<Job, CoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        match entry.job.status {
            JobStatus::Queued => {
                entry.job.status = JobStatus::Cancelled;
                entry.job.finished_at = Some(Utc::now());
                entry.cancel.cancel();
            }
            JobStatus::Running => entry.cancel.cancel(),
            status => {
                return Err(CoreError::Conflict(format!(
                    "Job {id} is already {}",
                    status.as_str()
                )))
            }
        }
        tracing::info!(job_id = %id, "Job cancellation requested");
        Ok(entry.job.clone())
    }

    /// Purge a job, cancelling it first if it has not finished.
    pub async fn delete(&self, id: JobId) -> Result<(), CoreError> {
        let entry = self.jobs.write().await.remove(&id).ok_or_else(|| not_found(id))?;
        if !entry.job.status.is_terminal() {
            entry.cancel.cancel();
        }
        tracing::info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Stop admitting jobs, cancel everything and wait up to `grace` for
    /// running containers to be torn down.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        {
            let mut jobs = self.jobs.write().await;
            for entry in jobs.values_mut() {
                if entry.job.status == JobStatus::Queued {
                    entry.job.status = JobStatus::Cancelled;
                    entry.job.finished_at = Some(Utc::now());
                }
            }
        }
        let all = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        if tokio::time::timeout(grace, self.slots.acquire_many(all)).await.is_err() {
            tracing::warn!("Timed out waiting for running jobs to stop");
        }
        tracing::info!("Job queue shut down");
    }

    async fn dispatch_loop(self: Arc<Self>, mut pending: mpsc::UnboundedReceiver<JobId>) {
        loop {
            let id = tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = pending.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            // Cancelled while waiting; do not hold a slot for it.
            if !self.is_queued(id).await {
                continue;
            }

            let permit = tokio::select! {
                () = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(cancel) = self.admit(id).await else {
                continue;
            };
            tokio::spawn(Arc::clone(&self).run_job(id, cancel, permit));
        }
        tracing::info!("Job dispatcher stopped");
    }

    async fn is_queued(&self, id: JobId) -> bool {
        self.jobs
            .read()
            .await
            .get(&id)
            .is_some_and(|e| e.job.status == JobStatus::Queued)
    }

    /// Move a job to `Running`, unless it was cancelled or deleted meanwhile.
    async fn admit(&self, id: JobId) -> Option<CancellationToken> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id)?;
        if entry.job.status != JobStatus::Queued {
            return None;
        }
        entry.job.status = JobStatus::Running;
        entry.job.started_at = Some(Utc::now());
        Some(entry.cancel.clone())
    }

    async fn run_job(self: Arc<Self>, id: JobId, cancel: CancellationToken, _permit: OwnedSemaphorePermit) {
        let Some(job) = self.get(id).await else {
            return;
        };
        tracing::info!(job_id = %id, worker = %job.worker, "Job started");

        let (sink, mut lines) = mpsc::unbounded_channel::<LogLine>();
        let collector = {
            let queue = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    queue.append_log(id, line).await;
                }
            })
        };

        let outcome = self.runner.run(&job, sink, cancel.clone()).await;
        let _ = collector.await;
        self.finish(id, outcome, cancel.is_cancelled()).await;
    }

    async fn append_log(&self, id: JobId, line: LogLine) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&id) else {
            return;
        };
        if entry.job.logs.len() >= MAX_LOG_LINES {
            entry.job.logs.pop_front();
        }
        entry.job.logs.push_back(match line.stream {
            LogStream::Stdout => line.line,
            LogStream::Stderr => format!("[stderr] {}", line.line),
        });
    }

    async fn finish(&self, id: JobId, outcome: Result<ExecutionOutcome, CoreError>, cancelled: bool) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&id) else {
            tracing::debug!(job_id = %id, "Job finished after being deleted");
            return;
        };
        let job = &mut entry.job;
        job.finished_at = Some(Utc::now());

        // A cancelled job stays cancelled even if its container exited on
        // its own before the stop landed.
        if cancelled {
            job.status = JobStatus::Cancelled;
            if let Ok(ExecutionOutcome::Finished(result)) = outcome {
                job.exit_code = Some(result.exit_code);
            }
            tracing::info!(job_id = %id, "Job cancelled");
            return;
        }

        match outcome {
            Ok(ExecutionOutcome::Finished(result)) => {
                job.exit_code = Some(result.exit_code);
                job.files = result.files;
                if result.exit_code == 0 {
                    job.status = JobStatus::Completed;
                } else {
                    job.status = JobStatus::Failed;
                    job.error = Some(format!("Container exited with code {}", result.exit_code));
                }
            }
            Ok(ExecutionOutcome::Cancelled) => job.status = JobStatus::Cancelled,
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }

        tracing::info!(
            job_id = %id,
            status = job.status.as_str(),
            exit_code = ?job.exit_code,
            "Job finished",
        );
    }
}

fn not_found(id: JobId) -> CoreError {
    CoreError::NotFound {
        entity: "Job",
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
