//! End-to-end engine tests against in-memory collaborators
//!
//! The fakes here stand in for the storage layer: a `MemStore` that
//! honors the all-or-nothing chunk contract (with optional synthetic save
//! failures) and a `GateWriter` that blocks commits so tests can observe
//! a live execution deterministically.

use anyhow::bail;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

use eis_batch::{
    BatchError, BatchStatus, ChunkStep, InMemoryLedger, Job, JobLauncher, JobParameters,
    PassthroughProcessor, RecordProcessor, RecordReader, RecordWriter,
};
use eis_common::Employee;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct SliceReader {
    items: Vec<Employee>,
    pos: usize,
}

#[async_trait]
impl RecordReader<Employee> for SliceReader {
    async fn next(&mut self) -> anyhow::Result<Option<Employee>> {
        if self.pos < self.items.len() {
            let record = self.items[self.pos].clone();
            self.pos += 1;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }
}

/// In-memory store honoring the chunk atomicity contract
#[derive(Default)]
struct MemStore {
    rows: Mutex<Vec<Employee>>,
    commit_sizes: Mutex<Vec<usize>>,
    /// Global save ordinal (across chunks) to fail at, consumed once
    fail_at: Mutex<Option<u64>>,
    saves_attempted: AtomicU64,
}

impl MemStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing_at(ordinal: u64) -> Arc<Self> {
        let store = Self::default();
        *store.fail_at.lock().unwrap() = Some(ordinal);
        Arc::new(store)
    }

    fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn commit_sizes(&self) -> Vec<usize> {
        self.commit_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordWriter<Employee> for MemStore {
    async fn write_chunk(&self, chunk: &[Employee]) -> anyhow::Result<()> {
        let mut staged = Vec::with_capacity(chunk.len());
        for record in chunk {
            let ordinal = self.saves_attempted.fetch_add(1, Ordering::SeqCst);
            {
                let mut fail_at = self.fail_at.lock().unwrap();
                if *fail_at == Some(ordinal) {
                    *fail_at = None;
                    bail!("synthetic save failure at record {}", ordinal);
                }
            }
            staged.push(record.clone());
        }

        // Whole chunk or nothing: apply staged rows only after every save
        // succeeded, assigning ids on commit.
        let mut rows = self.rows.lock().unwrap();
        for mut record in staged {
            record.id = Some(rows.len() as i32 + 1);
            rows.push(record);
        }
        self.commit_sizes.lock().unwrap().push(chunk.len());
        Ok(())
    }
}

/// Writer that parks every commit until the test hands out a permit
struct GateWriter {
    inner: Arc<MemStore>,
    entered: mpsc::UnboundedSender<()>,
    release: Arc<Semaphore>,
}

#[async_trait]
impl RecordWriter<Employee> for GateWriter {
    async fn write_chunk(&self, chunk: &[Employee]) -> anyhow::Result<()> {
        let _ = self.entered.send(());
        let permit = self.release.acquire().await?;
        permit.forget();
        self.inner.write_chunk(chunk).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn employees(n: usize) -> Vec<Employee> {
    (0..n)
        .map(|i| Employee {
            id: None,
            first_name: format!("First{}", i),
            last_name: format!("Last{}", i),
            email: format!("user{}@example.com", i),
            contact: format!("555-{:04}", i),
            country: "US".to_string(),
            dob: "1990-01-01".to_string(),
        })
        .collect()
}

fn import_job(
    records: Vec<Employee>,
    chunk_size: usize,
    processor: Box<dyn RecordProcessor<Employee>>,
    writer: Arc<dyn RecordWriter<Employee>>,
) -> Arc<Job<Employee>> {
    let step = ChunkStep::new(
        "csv-to-db-step",
        chunk_size,
        Box::new(move || {
            Box::new(SliceReader {
                items: records.clone(),
                pos: 0,
            }) as Box<dyn RecordReader<Employee>>
        }),
        processor,
        writer,
    );
    Arc::new(Job::new("csv-import-job", step))
}

fn params(time: i64) -> JobParameters {
    JobParameters::builder().add_long("time", time).build()
}

fn launcher() -> JobLauncher {
    JobLauncher::new(Arc::new(InMemoryLedger::new()), 10)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_records_committed_in_source_order_chunks() {
    let store = MemStore::new();
    let job = import_job(
        employees(45),
        20,
        Box::new(PassthroughProcessor),
        store.clone(),
    );
    let launcher = launcher();

    let handle = launcher.launch(job, &params(1)).await.unwrap();
    let status = handle.wait().await.unwrap();

    assert_eq!(status, BatchStatus::Completed);
    // Exactly three commits, sizes 20/20/5, in order
    assert_eq!(store.commit_sizes(), vec![20, 20, 5]);
    assert_eq!(store.row_count(), 45);

    // Records persisted in source order with storage-assigned ids
    let rows = store.rows.lock().unwrap();
    assert_eq!(rows[0].first_name, "First0");
    assert_eq!(rows[44].first_name, "First44");
    assert_eq!(rows[44].id, Some(45));
}

#[tokio::test]
async fn filtered_records_never_enter_a_chunk() {
    let store = MemStore::new();
    // Drop every employee with an odd index (encoded in the contact field)
    let filter = |record: Employee| -> anyhow::Result<Option<Employee>> {
        let odd = record
            .contact
            .trim_start_matches("555-")
            .parse::<u32>()
            .map(|n| n % 2 == 1)
            .unwrap_or(false);
        Ok(if odd { None } else { Some(record) })
    };
    let job = import_job(employees(10), 3, Box::new(filter), store.clone());
    let launcher = launcher();

    let status = launcher
        .launch(job, &params(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(store.row_count(), 5);
    assert_eq!(store.commit_sizes(), vec![3, 2]);
}

#[tokio::test]
async fn failed_chunk_is_invisible_and_prior_chunks_persist() {
    // Fault on the 6th record of the second chunk (global ordinal 25)
    let store = MemStore::failing_at(25);
    let job = import_job(
        employees(45),
        20,
        Box::new(PassthroughProcessor),
        store.clone(),
    );
    let launcher = launcher();

    let handle = launcher.launch(job, &params(1)).await.unwrap();
    let execution_id = handle.execution_id();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, BatchError::ChunkCommit { chunk_index: 1, .. }));
    // Chunk 1 fully persisted, chunk 2 entirely absent
    assert_eq!(store.row_count(), 20);
    assert_eq!(store.commit_sizes(), vec![20]);

    let execution = launcher
        .ledger()
        .get_execution(execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.items_committed, 20);
    assert!(execution.exit_message.unwrap().contains("commit failed"));
}

#[tokio::test]
async fn duplicate_trigger_after_completion_is_rejected() {
    let store = MemStore::new();
    let job = import_job(
        employees(5),
        20,
        Box::new(PassthroughProcessor),
        store.clone(),
    );
    let launcher = launcher();

    let status = launcher
        .launch(job.clone(), &params(42))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(store.row_count(), 5);

    // Identical identifying parameters collide with the completed instance
    let err = launcher.launch(job.clone(), &params(42)).await.unwrap_err();
    assert!(matches!(err, BatchError::AlreadyComplete { .. }));
    assert_eq!(store.row_count(), 5);

    // A fresh identifying parameter forms a new instance and runs
    let status = launcher
        .launch(job, &params(43))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(store.row_count(), 10);
}

#[tokio::test]
async fn concurrent_trigger_with_same_identity_is_rejected() {
    let store = MemStore::new();
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let release = Arc::new(Semaphore::new(0));
    let writer = Arc::new(GateWriter {
        inner: store.clone(),
        entered: entered_tx,
        release: release.clone(),
    });

    let job = import_job(employees(6), 2, Box::new(PassthroughProcessor), writer);
    let launcher = launcher();

    let handle = launcher.launch(job.clone(), &params(7)).await.unwrap();

    // First execution is mid-commit, definitely still live
    entered_rx.recv().await.unwrap();

    let err = launcher.launch(job, &params(7)).await.unwrap_err();
    assert!(matches!(err, BatchError::AlreadyRunning { .. }));

    release.add_permits(100);
    let status = handle.wait().await.unwrap();
    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(store.row_count(), 6);
}

#[tokio::test]
async fn restart_resumes_from_last_committed_position() {
    let store = MemStore::failing_at(25);
    let job = import_job(
        employees(45),
        20,
        Box::new(PassthroughProcessor),
        store.clone(),
    );
    let launcher = launcher();

    let err = launcher
        .launch(job.clone(), &params(9))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::ChunkCommit { .. }));
    assert_eq!(store.row_count(), 20);

    // Same identifying parameters restart the failed instance; the reader
    // resumes after the 20 committed records, so nothing is duplicated.
    let handle = launcher.launch(job, &params(9)).await.unwrap();
    let restart_id = handle.execution_id();
    let status = handle.wait().await.unwrap();

    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(store.row_count(), 45);
    assert_eq!(store.commit_sizes(), vec![20, 20, 5]);

    {
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows[20].first_name, "First20");
        assert_eq!(rows[44].first_name, "First44");
    }

    let execution = launcher
        .ledger()
        .get_execution(restart_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.items_committed, 45);
}

#[tokio::test]
async fn restart_rejected_when_job_not_restartable() {
    let store = MemStore::failing_at(2);
    let job = Arc::new(
        Job::new(
            "csv-import-job",
            ChunkStep::new(
                "csv-to-db-step",
                5,
                {
                    let records = employees(10);
                    Box::new(move || {
                        Box::new(SliceReader {
                            items: records.clone(),
                            pos: 0,
                        }) as Box<dyn RecordReader<Employee>>
                    })
                },
                Box::new(PassthroughProcessor),
                store.clone() as Arc<dyn RecordWriter<Employee>>,
            ),
        )
        .with_restartable(false),
    );
    let launcher = launcher();

    let err = launcher
        .launch(job.clone(), &params(3))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::ChunkCommit { .. }));

    let err = launcher.launch(job, &params(3)).await.unwrap_err();
    assert!(matches!(err, BatchError::RestartInvalid { .. }));
}

#[tokio::test]
async fn stop_request_takes_effect_at_chunk_boundary() {
    let store = MemStore::new();
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let release = Arc::new(Semaphore::new(0));
    let writer = Arc::new(GateWriter {
        inner: store.clone(),
        entered: entered_tx,
        release: release.clone(),
    });

    let job = import_job(employees(6), 2, Box::new(PassthroughProcessor), writer);
    let launcher = launcher();

    let handle = launcher.launch(job, &params(11)).await.unwrap();
    let execution_id = handle.execution_id();

    // Stop while the first chunk is mid-commit; the chunk in flight must
    // still run to a durable commit.
    entered_rx.recv().await.unwrap();
    assert!(launcher.stop(execution_id));
    release.add_permits(100);

    let status = handle.wait().await.unwrap();
    assert_eq!(status, BatchStatus::Stopped);
    assert_eq!(store.row_count(), 2);

    let execution = launcher
        .ledger()
        .get_execution(execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, BatchStatus::Stopped);
    assert_eq!(execution.items_committed, 2);

    // The execution is gone; stopping again is a no-op
    assert!(!launcher.stop(execution_id));
}

#[tokio::test]
async fn flat_file_import_end_to_end() {
    use eis_batch::FlatFileReader;
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "firstName,lastName,email,contact,country,dob").unwrap();
    for i in 0..44 {
        writeln!(
            file,
            "First{i},Last{i},user{i}@example.com,555-{i:04},US,1990-01-01"
        )
        .unwrap();
    }
    // One truncated line; missing trailing fields default to empty
    writeln!(file, "Short,Line,short@example.com").unwrap();
    file.flush().unwrap();
    let path = file.path().to_path_buf();

    let store = MemStore::new();
    let step = ChunkStep::new(
        "csv-to-db-step",
        20,
        Box::new(move || {
            Box::new(
                FlatFileReader::new(&path, Arc::new(Employee::from_tokens))
                    .with_lines_to_skip(1),
            ) as Box<dyn RecordReader<Employee>>
        }),
        Box::new(PassthroughProcessor),
        store.clone() as Arc<dyn RecordWriter<Employee>>,
    );
    let job = Arc::new(Job::new("csv-import-job", step));
    let launcher = launcher();

    let status = launcher
        .launch(job, &params(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(store.row_count(), 45);
    assert_eq!(store.commit_sizes(), vec![20, 20, 5]);

    let rows = store.rows.lock().unwrap();
    assert_eq!(rows[44].first_name, "Short");
    assert_eq!(rows[44].contact, "");
    assert_eq!(rows[44].dob, "");
}

#[tokio::test]
async fn empty_source_completes_with_no_commits() {
    let store = MemStore::new();
    let job = import_job(
        employees(0),
        20,
        Box::new(PassthroughProcessor),
        store.clone(),
    );
    let launcher = launcher();

    let status = launcher
        .launch(job, &params(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(store.row_count(), 0);
    assert!(store.commit_sizes().is_empty());
}
