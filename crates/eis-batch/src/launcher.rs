//! Job launcher and orchestration
//!
//! Owns the run-identity check, the execution state machine and a bounded
//! pool of concurrent executions. Identity conflicts are resolved
//! synchronously in [`JobLauncher::launch`] so the caller learns about
//! them immediately; the chunk step itself runs on a spawned task gated by
//! a semaphore, and the caller gets a handle to await the outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{BatchError, BatchResult};
use crate::execution::BatchStatus;
use crate::job::Job;
use crate::ledger::ExecutionLedger;
use crate::params::JobParameters;
use crate::step::StepOutcome;

type StopFlags = Arc<Mutex<HashMap<i64, Arc<AtomicBool>>>>;

/// Handle to a launched job execution
#[derive(Debug)]
pub struct JobExecutionHandle {
    execution_id: i64,
    handle: JoinHandle<BatchResult<BatchStatus>>,
}

impl JobExecutionHandle {
    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    /// Await the terminal status of the execution
    pub async fn wait(self) -> BatchResult<BatchStatus> {
        self.handle
            .await
            .map_err(|e| BatchError::Launcher(format!("Execution task panicked: {}", e)))?
    }
}

/// Launches jobs with a hard cap on concurrent executions
pub struct JobLauncher {
    ledger: Arc<dyn ExecutionLedger>,
    semaphore: Arc<Semaphore>,
    stop_flags: StopFlags,
}

impl JobLauncher {
    /// Create a launcher backed by `ledger`, running at most
    /// `concurrency_limit` executions at a time
    pub fn new(ledger: Arc<dyn ExecutionLedger>, concurrency_limit: usize) -> Self {
        assert!(concurrency_limit > 0, "concurrency limit must be at least 1");
        Self {
            ledger,
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            stop_flags: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ledger(&self) -> Arc<dyn ExecutionLedger> {
        self.ledger.clone()
    }

    /// Launch a job with the given parameters
    ///
    /// Performs the ledger identity check before returning, so
    /// `AlreadyRunning` / `AlreadyComplete` / `RestartInvalid` surface to
    /// the caller with no partial work done. On success the execution is
    /// recorded as STARTING and runs on a pooled task.
    pub async fn launch<R: Send + 'static>(
        &self,
        job: Arc<Job<R>>,
        params: &JobParameters,
    ) -> BatchResult<JobExecutionHandle> {
        let job_key = params.identity_key();
        let execution = self
            .ledger
            .record_start(job.name(), &job_key, job.restartable())
            .await?;

        info!(
            job = %job.name(),
            execution_id = execution.id,
            resume_from = execution.items_committed,
            "Job execution registered"
        );

        let stop = Arc::new(AtomicBool::new(false));
        lock_flags(&self.stop_flags).insert(execution.id, stop.clone());

        let ledger = self.ledger.clone();
        let semaphore = self.semaphore.clone();
        let stop_flags = self.stop_flags.clone();
        let execution_id = execution.id;
        let start_from = execution.items_committed.max(0) as u64;

        let handle = tokio::spawn(async move {
            let result =
                run_execution(job, ledger, semaphore, execution_id, start_from, stop).await;
            lock_flags(&stop_flags).remove(&execution_id);
            result
        });

        Ok(JobExecutionHandle {
            execution_id,
            handle,
        })
    }

    /// Request a stop; takes effect at the next chunk boundary
    ///
    /// Returns false when the execution is not currently live.
    pub fn stop(&self, execution_id: i64) -> bool {
        match lock_flags(&self.stop_flags).get(&execution_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                warn!(execution_id, "Stop requested");
                true
            }
            None => false,
        }
    }
}

async fn run_execution<R: Send + 'static>(
    job: Arc<Job<R>>,
    ledger: Arc<dyn ExecutionLedger>,
    semaphore: Arc<Semaphore>,
    execution_id: i64,
    start_from: u64,
    stop: Arc<AtomicBool>,
) -> BatchResult<BatchStatus> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| BatchError::Launcher("Execution pool closed".to_string()))?;

    ledger.mark_started(execution_id).await?;
    info!(job = %job.name(), execution_id, "Job execution started");

    match job.step().execute(start_from, &stop).await {
        StepOutcome::Completed(summary) => {
            ledger
                .record_end(
                    execution_id,
                    BatchStatus::Completed,
                    summary.items_committed as i64,
                    None,
                )
                .await?;
            info!(
                job = %job.name(),
                execution_id,
                read = summary.read_count,
                written = summary.written_count,
                chunks = summary.commit_count,
                "Job execution completed"
            );
            Ok(BatchStatus::Completed)
        }
        StepOutcome::Stopped(summary) => {
            ledger
                .record_end(
                    execution_id,
                    BatchStatus::Stopped,
                    summary.items_committed as i64,
                    Some("Stop requested".to_string()),
                )
                .await?;
            warn!(job = %job.name(), execution_id, "Job execution stopped");
            Ok(BatchStatus::Stopped)
        }
        StepOutcome::Failed { summary, error } => {
            // Persist the failure before surfacing it; a ledger write
            // error here must not mask the step error.
            if let Err(ledger_err) = ledger
                .record_end(
                    execution_id,
                    BatchStatus::Failed,
                    summary.items_committed as i64,
                    Some(error.to_string()),
                )
                .await
            {
                error!(execution_id, error = %ledger_err, "Failed to record execution failure");
            }
            error!(job = %job.name(), execution_id, error = %error, "Job execution failed");
            Err(error)
        }
    }
}

fn lock_flags(flags: &Mutex<HashMap<i64, Arc<AtomicBool>>>) -> std::sync::MutexGuard<'_, HashMap<i64, Arc<AtomicBool>>> {
    flags.lock().unwrap_or_else(PoisonError::into_inner)
}
