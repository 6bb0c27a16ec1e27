//! Postgres-backed execution ledger
//!
//! Persists job instances and executions in `batch_job_instance` /
//! `batch_job_execution`. The check-then-act in `record_start` runs inside
//! one transaction holding a per-identity advisory lock, so two concurrent
//! triggers with the same identity serialize at the database and only one
//! of them records a new execution.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use eis_batch::{
    BatchError, BatchResult, BatchStatus, ExecutionLedger, JobExecution, JobInstance,
};

pub struct PgExecutionLedger {
    pool: PgPool,
}

impl PgExecutionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> BatchError {
    BatchError::Ledger(anyhow::Error::new(e))
}

fn execution_from_row(row: &PgRow) -> BatchResult<JobExecution> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(JobExecution {
        id: row.try_get("id").map_err(db_err)?,
        instance_id: row.try_get("instance_id").map_err(db_err)?,
        status: status.parse().map_err(BatchError::Ledger)?,
        start_time: row.try_get("start_time").map_err(db_err)?,
        end_time: row.try_get("end_time").map_err(db_err)?,
        exit_message: row.try_get("exit_message").map_err(db_err)?,
        items_committed: row.try_get("items_committed").map_err(db_err)?,
    })
}

const EXECUTION_COLUMNS: &str =
    "id, instance_id, status, start_time, end_time, exit_message, items_committed";

#[async_trait]
impl ExecutionLedger for PgExecutionLedger {
    async fn find_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> BatchResult<Option<JobInstance>> {
        let row = sqlx::query(
            "SELECT id, job_name, job_key FROM batch_job_instance \
             WHERE job_name = $1 AND job_key = $2",
        )
        .bind(job_name)
        .bind(job_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(JobInstance {
                id: row.try_get("id").map_err(db_err)?,
                job_name: row.try_get("job_name").map_err(db_err)?,
                job_key: row.try_get("job_key").map_err(db_err)?,
            })),
            None => Ok(None),
        }
    }

    async fn latest_execution(&self, instance_id: i64) -> BatchResult<Option<JobExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM batch_job_execution \
             WHERE instance_id = $1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn get_execution(&self, execution_id: i64) -> BatchResult<Option<JobExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM batch_job_execution WHERE id = $1"
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn record_start(
        &self,
        job_name: &str,
        job_key: &str,
        restartable: bool,
    ) -> BatchResult<JobExecution> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serialize concurrent triggers of the same identity for the
        // duration of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2))")
            .bind(job_name)
            .bind(job_key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let instance_id: i64 = match sqlx::query(
            "SELECT id FROM batch_job_instance WHERE job_name = $1 AND job_key = $2",
        )
        .bind(job_name)
        .bind(job_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        {
            Some(row) => row.try_get("id").map_err(db_err)?,
            None => sqlx::query(
                "INSERT INTO batch_job_instance (job_name, job_key) \
                 VALUES ($1, $2) RETURNING id",
            )
            .bind(job_name)
            .bind(job_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?
            .try_get("id")
            .map_err(db_err)?,
        };

        let latest = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM batch_job_execution \
             WHERE instance_id = $1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(instance_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .as_ref()
        .map(execution_from_row)
        .transpose()?;

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

        let start_time = Utc::now();
        let execution_id: i64 = sqlx::query(
            "INSERT INTO batch_job_execution (instance_id, status, start_time, items_committed) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(instance_id)
        .bind(BatchStatus::Starting.as_str())
        .bind(start_time)
        .bind(resume_from)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?
        .try_get("id")
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(JobExecution {
            id: execution_id,
            instance_id,
            status: BatchStatus::Starting,
            start_time,
            end_time: None,
            exit_message: None,
            items_committed: resume_from,
        })
    }

    async fn mark_started(&self, execution_id: i64) -> BatchResult<()> {
        let result = sqlx::query(
            "UPDATE batch_job_execution SET status = $2 \
             WHERE id = $1 AND status IN ('STARTING', 'STARTED')",
        )
        .bind(execution_id)
        .bind(BatchStatus::Started.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(BatchError::Ledger(anyhow::anyhow!(
                "Execution {} is unknown or already terminal",
                execution_id
            )));
        }
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

        let result = sqlx::query(
            "UPDATE batch_job_execution \
             SET status = $2, end_time = $3, items_committed = $4, exit_message = $5 \
             WHERE id = $1 AND status IN ('STARTING', 'STARTED')",
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(items_committed)
        .bind(exit_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(BatchError::Ledger(anyhow::anyhow!(
                "Execution {} is unknown or already terminal",
                execution_id
            )));
        }
        Ok(())
    }
}
