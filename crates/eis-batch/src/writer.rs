//! Transactional chunk writer seam
//!
//! The engine hands each full chunk to a writer exactly once. The writer
//! owns the transaction boundary: it must persist the whole chunk in one
//! transaction, in order, and roll everything back if any single record
//! fails. A partially visible chunk is a contract violation.

use anyhow::Result;
use async_trait::async_trait;

/// Atomic chunk persistence
#[async_trait]
pub trait RecordWriter<R>: Send + Sync {
    /// Persist one chunk atomically; any error means nothing was written
    async fn write_chunk(&self, chunk: &[R]) -> Result<()>;
}
