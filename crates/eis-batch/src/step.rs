//! Chunk-oriented step
//!
//! The read/process/write loop at the heart of the engine: pull records
//! one at a time, process them, buffer into fixed-size chunks, and commit
//! each chunk atomically. Chunks commit strictly in source order; a commit
//! failure ends the step but leaves prior chunks persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chunk::ChunkBuffer;
use crate::error::BatchError;
use crate::execution::StepSummary;
use crate::processor::RecordProcessor;
use crate::reader::RecordReader;
use crate::writer::RecordWriter;

/// Produces a fresh reader for each execution of the step
pub type ReaderFactory<R> = Box<dyn Fn() -> Box<dyn RecordReader<R>> + Send + Sync>;

/// How a step execution ended
#[derive(Debug)]
pub enum StepOutcome {
    /// Source exhausted, every chunk committed
    Completed(StepSummary),
    /// Stop requested; honored at a chunk boundary
    Stopped(StepSummary),
    /// Read, process or commit failure; prior chunks remain committed
    Failed {
        summary: StepSummary,
        error: BatchError,
    },
}

impl StepOutcome {
    pub fn summary(&self) -> &StepSummary {
        match self {
            StepOutcome::Completed(summary)
            | StepOutcome::Stopped(summary)
            | StepOutcome::Failed { summary, .. } => summary,
        }
    }
}

/// A single chunk-oriented step: reader -> processor -> chunked writer
pub struct ChunkStep<R> {
    name: String,
    chunk_size: usize,
    reader_factory: ReaderFactory<R>,
    processor: Box<dyn RecordProcessor<R>>,
    writer: Arc<dyn RecordWriter<R>>,
}

impl<R: Send + 'static> ChunkStep<R> {
    pub fn new(
        name: impl Into<String>,
        chunk_size: usize,
        reader_factory: ReaderFactory<R>,
        processor: Box<dyn RecordProcessor<R>>,
        writer: Arc<dyn RecordWriter<R>>,
    ) -> Self {
        assert!(chunk_size > 0, "chunk size must be at least 1");
        Self {
            name: name.into(),
            chunk_size,
            reader_factory,
            processor,
            writer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the step, resuming after `start_from` already-committed records
    ///
    /// `stop` is consulted only at chunk boundaries; a chunk in flight
    /// always runs to commit or rollback.
    pub async fn execute(&self, start_from: u64, stop: &AtomicBool) -> StepOutcome {
        let mut reader = (self.reader_factory)();
        let mut summary = StepSummary {
            items_committed: start_from,
            ..Default::default()
        };

        if start_from > 0 {
            debug!(step = %self.name, start_from, "Resuming from committed position");
            if let Err(e) = reader.jump_to(start_from).await {
                return StepOutcome::Failed {
                    summary,
                    error: BatchError::Read(e),
                };
            }
        }

        let mut buffer = ChunkBuffer::new(self.chunk_size);
        // Records consumed from the source since the last commit; folded
        // into items_committed once their chunk is durable.
        let mut pending_reads = 0u64;

        loop {
            if buffer.is_empty() && stop.load(Ordering::SeqCst) {
                warn!(step = %self.name, "Stop requested, ending at chunk boundary");
                return StepOutcome::Stopped(summary);
            }

            let record = match reader.next().await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    return StepOutcome::Failed {
                        summary,
                        error: BatchError::Read(e),
                    }
                }
            };
            summary.read_count += 1;
            pending_reads += 1;

            match self.processor.process(record) {
                Ok(Some(processed)) => {
                    if let Some(chunk) = buffer.push(processed) {
                        if let Err(error) =
                            self.commit_chunk(chunk, &mut summary, &mut pending_reads).await
                        {
                            return StepOutcome::Failed { summary, error };
                        }
                    }
                }
                Ok(None) => summary.filtered_count += 1,
                Err(e) => {
                    return StepOutcome::Failed {
                        summary,
                        error: BatchError::Process(e),
                    }
                }
            }
        }

        if let Some(chunk) = buffer.flush() {
            if let Err(error) = self.commit_chunk(chunk, &mut summary, &mut pending_reads).await {
                return StepOutcome::Failed { summary, error };
            }
        }

        debug!(
            step = %self.name,
            read = summary.read_count,
            written = summary.written_count,
            chunks = summary.commit_count,
            "Step completed"
        );
        StepOutcome::Completed(summary)
    }

    async fn commit_chunk(
        &self,
        chunk: Vec<R>,
        summary: &mut StepSummary,
        pending_reads: &mut u64,
    ) -> Result<(), BatchError> {
        let size = chunk.len();
        self.writer
            .write_chunk(&chunk)
            .await
            .map_err(|source| BatchError::ChunkCommit {
                chunk_index: summary.commit_count,
                source,
            })?;

        summary.written_count += size as u64;
        summary.commit_count += 1;
        summary.items_committed += *pending_reads;
        *pending_reads = 0;

        debug!(step = %self.name, chunk = summary.commit_count - 1, size, "Chunk committed");
        Ok(())
    }
}
