//! Error types for the batch engine

use thiserror::Error;

/// Result type alias for batch operations
pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// Errors surfaced by the batch engine
///
/// Identity conflicts (`AlreadyRunning`, `AlreadyComplete`,
/// `RestartInvalid`) are detected before any data is touched. A chunk
/// commit failure fails the whole job but leaves previously committed
/// chunks intact; the unit of atomicity is the chunk, not the job.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Job execution already running for {job_name} (key {job_key})")]
    AlreadyRunning { job_name: String, job_key: String },

    #[error("Job instance already complete for {job_name} (key {job_key})")]
    AlreadyComplete { job_name: String, job_key: String },

    #[error("Restart not permitted for {job_name} (key {job_key})")]
    RestartInvalid { job_name: String, job_key: String },

    #[error("Chunk {chunk_index} commit failed: {source}")]
    ChunkCommit {
        chunk_index: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Record read failed: {0}")]
    Read(#[source] anyhow::Error),

    #[error("Record processing failed: {0}")]
    Process(#[source] anyhow::Error),

    #[error("Execution ledger error: {0}")]
    Ledger(#[source] anyhow::Error),

    #[error("Launcher error: {0}")]
    Launcher(String),
}

impl BatchError {
    /// Whether this error is a pre-step job identity conflict
    pub fn is_identity_conflict(&self) -> bool {
        matches!(
            self,
            BatchError::AlreadyRunning { .. }
                | BatchError::AlreadyComplete { .. }
                | BatchError::RestartInvalid { .. }
        )
    }
}
