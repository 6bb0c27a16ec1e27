//! Postgres employee store
//!
//! Two-operation storage collaborator backing the import job: `save`
//! inserts one record within a caller-supplied transaction, and
//! `write_chunk` (the engine's `RecordWriter` seam) routes a whole chunk
//! through `save` inside one transaction. A failed save rolls the whole
//! chunk back, so partially written chunks are never visible.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use eis_batch::RecordWriter;
use eis_common::Employee;

pub struct PgEmployeeStore {
    pool: PgPool,
}

impl PgEmployeeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one employee within the caller's transaction
    ///
    /// Returns the storage-assigned id. Visibility follows the
    /// transaction: the row is durable only once the caller commits.
    pub async fn save(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &Employee,
    ) -> anyhow::Result<i32> {
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO employee_info \
             (first_name, last_name, email, contact, country, dob) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.email)
        .bind(&record.contact)
        .bind(&record.country)
        .bind(&record.dob)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    /// Total persisted employee rows
    pub async fn count(&self) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employee_info")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecordWriter<Employee> for PgEmployeeStore {
    async fn write_chunk(&self, chunk: &[Employee]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in chunk {
            self.save(&mut tx, record).await?;
        }

        tx.commit().await?;
        debug!(size = chunk.len(), "Employee chunk committed");
        Ok(())
    }
}
