//! EIS Batch Engine
//!
//! A chunk-oriented batch processing engine: records are read lazily from a
//! [`reader::RecordReader`], passed through a [`processor::RecordProcessor`],
//! buffered into fixed-size chunks and committed atomically through a
//! [`writer::RecordWriter`]. Each run is identified by its
//! [`params::JobParameters`] and tracked in an [`ledger::ExecutionLedger`]
//! so duplicate runs are rejected and failed runs can resume from the last
//! committed position.
//!
//! # Architecture
//!
//! - **Reader**: lazy, finite, positionally restartable record sequence
//! - **Processor**: pluggable per-record transform / filter stage
//! - **Chunk buffer + writer**: all-or-nothing chunk commits
//! - **Ledger**: durable job instance / execution history
//! - **Launcher**: bounded-concurrency job execution with stop support
//!
//! All collaborators are passed explicitly at construction; the engine has
//! no storage engine of its own beyond the in-memory ledger used for tests
//! and embedded runs.

pub mod chunk;
pub mod error;
pub mod execution;
pub mod job;
pub mod launcher;
pub mod ledger;
pub mod params;
pub mod processor;
pub mod reader;
pub mod step;
pub mod writer;

// Re-export commonly used types
pub use error::{BatchError, BatchResult};
pub use execution::{BatchStatus, JobExecution, JobInstance, StepSummary};
pub use job::Job;
pub use launcher::{JobExecutionHandle, JobLauncher};
pub use ledger::{ExecutionLedger, InMemoryLedger};
pub use params::{JobParameters, ParamValue};
pub use processor::{PassthroughProcessor, RecordProcessor};
pub use reader::{FlatFileReader, RecordReader};
pub use step::{ChunkStep, StepOutcome};
pub use writer::RecordWriter;
