//! Execution ledger
//!
//! Durable record of job instances and executions, queried before every
//! launch decision. The ledger is the authority on run identity: the
//! check-then-act in [`ExecutionLedger::record_start`] must be serialized
//! by the implementation (mutex in memory, unique constraint plus
//! transaction in SQL) so two concurrent triggers cannot both believe they
//! are the first to start a given identity.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{BatchError, BatchResult};
use crate::execution::{BatchStatus, JobExecution, JobInstance};

/// Durable store of job instance / execution history
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Find the instance for a job name + identity key
    async fn find_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> BatchResult<Option<JobInstance>>;

    /// Most recent execution of an instance, if any
    async fn latest_execution(&self, instance_id: i64) -> BatchResult<Option<JobExecution>>;

    /// Fetch a single execution by id
    async fn get_execution(&self, execution_id: i64) -> BatchResult<Option<JobExecution>>;

    /// Atomically resolve run identity and record a STARTING execution
    ///
    /// Creates the instance if it does not exist. Rejects with
    /// [`BatchError::AlreadyComplete`] when the instance has a COMPLETED
    /// execution, [`BatchError::AlreadyRunning`] when a live execution
    /// exists, and [`BatchError::RestartInvalid`] when a prior execution
    /// failed or stopped but the job is not restartable. On a permitted
    /// restart the new execution inherits the prior `items_committed` as
    /// its resume position.
    async fn record_start(
        &self,
        job_name: &str,
        job_key: &str,
        restartable: bool,
    ) -> BatchResult<JobExecution>;

    /// Transition an execution from STARTING to STARTED
    async fn mark_started(&self, execution_id: i64) -> BatchResult<()>;

    /// Record the terminal status, final counters and end timestamp
    async fn record_end(
        &self,
        execution_id: i64,
        status: BatchStatus,
        items_committed: i64,
        exit_message: Option<String>,
    ) -> BatchResult<()>;
}

#[derive(Default)]
struct LedgerState {
    instances: HashMap<(String, String), JobInstance>,
    executions: Vec<JobExecution>,
    next_instance_id: i64,
    next_execution_id: i64,
}

/// In-memory ledger
///
/// Serializes all operations behind one mutex, which also provides the
/// atomic check-then-act required by `record_start`. Suitable for tests
/// and embedded runs; history does not survive a process restart.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLedger for InMemoryLedger {
    async fn find_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> BatchResult<Option<JobInstance>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state
            .instances
            .get(&(job_name.to_string(), job_key.to_string()))
            .cloned())
    }

    async fn latest_execution(&self, instance_id: i64) -> BatchResult<Option<JobExecution>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state
            .executions
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .max_by_key(|e| e.id)
            .cloned())
    }

    async fn get_execution(&self, execution_id: i64) -> BatchResult<Option<JobExecution>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state
            .executions
            .iter()
            .find(|e| e.id == execution_id)
            .cloned())
    }

    async fn record_start(
        &self,
        job_name: &str,
        job_key: &str,
        restartable: bool,
    ) -> BatchResult<JobExecution> {
        let mut state = self.state.lock().map_err(poisoned)?;

        let key = (job_name.to_string(), job_key.to_string());
        let instance_id = match state.instances.get(&key) {
            Some(instance) => instance.id,
            None => {
                state.next_instance_id += 1;
                let id = state.next_instance_id;
                state.instances.insert(
                    key,
                    JobInstance {
                        id,
                        job_name: job_name.to_string(),
                        job_key: job_key.to_string(),
                    },
                );
                id
            }
        };

        let latest = state
            .executions
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .max_by_key(|e| e.id)
            .cloned();

        let resume_from = match latest {
            None => 0,
            Some(prior) if prior.status.is_running() => {
                return Err(BatchError::AlreadyRunning {
                    job_name: job_name.to_string(),
                    job_key: job_key.to_string(),
                });
            }
            Some(prior) if prior.status == BatchStatus::Completed => {
                return Err(BatchError::AlreadyComplete {
                    job_name: job_name.to_string(),
                    job_key: job_key.to_string(),
                });
            }
            Some(_) if !restartable => {
                return Err(BatchError::RestartInvalid {
                    job_name: job_name.to_string(),
                    job_key: job_key.to_string(),
                });
            }
            Some(prior) => prior.items_committed,
        };

        state.next_execution_id += 1;
        let execution = JobExecution {
            id: state.next_execution_id,
            instance_id,
            status: BatchStatus::Starting,
            start_time: Utc::now(),
            end_time: None,
            exit_message: None,
            items_committed: resume_from,
        };
        state.executions.push(execution.clone());

        Ok(execution)
    }

    async fn mark_started(&self, execution_id: i64) -> BatchResult<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let execution = state
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| unknown_execution(execution_id))?;

        if execution.status.is_terminal() {
            return Err(BatchError::Ledger(anyhow::anyhow!(
                "Execution {} is already terminal ({})",
                execution_id,
                execution.status
            )));
        }

        execution.status = BatchStatus::Started;
        Ok(())
    }

    async fn record_end(
        &self,
        execution_id: i64,
        status: BatchStatus,
        items_committed: i64,
        exit_message: Option<String>,
    ) -> BatchResult<()> {
        if !status.is_terminal() {
            return Err(BatchError::Ledger(anyhow::anyhow!(
                "record_end requires a terminal status, got {}",
                status
            )));
        }

        let mut state = self.state.lock().map_err(poisoned)?;
        let execution = state
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| unknown_execution(execution_id))?;

        if execution.status.is_terminal() {
            return Err(BatchError::Ledger(anyhow::anyhow!(
                "Execution {} is already terminal ({})",
                execution_id,
                execution.status
            )));
        }

        execution.status = status;
        execution.end_time = Some(Utc::now());
        execution.items_committed = items_committed;
        execution.exit_message = exit_message;
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> BatchError {
    BatchError::Ledger(anyhow::anyhow!("Ledger mutex poisoned"))
}

fn unknown_execution(execution_id: i64) -> BatchError {
    BatchError::Ledger(anyhow::anyhow!("Unknown execution id {}", execution_id))
}
