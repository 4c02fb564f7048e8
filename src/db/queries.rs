use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::job::{JobPatch, JobRecord, JobStatus};
use crate::services::store::{JobStore, StoreError};

const NOTIFY_CHANNEL: &str = "generation_jobs";

/// Postgres-backed record store.
///
/// Records live as JSONB next to indexed `owner_id`/`status` columns. Every
/// write also fires `pg_notify` so out-of-process clients can follow changes.
pub struct PgJobStore {
    pool: PgPool,
    changes: broadcast::Sender<JobRecord>,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT record
            FROM generation_jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let Json(current): Json<JobRecord> = row.try_get("record")?;
        if !allowed.contains(&current.status) {
            tx.rollback().await?;
            return Ok(None);
        }

        let updated = patch.apply(&current)?;

        sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = $1,
                record = $2,
                updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(updated.status.to_string())
        .bind(Json(&updated))
        .bind(updated.metadata.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let _ = self.changes.send(updated.clone());
        Ok(Some(updated))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO generation_jobs (id, owner_id, status, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.owner_id)
        .bind(record.status.to_string())
        .bind(Json(record))
        .bind(record.metadata.created_at)
        .bind(record.metadata.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(record.id));
        }

        let _ = self.changes.send(record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT record
            FROM generation_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let Json(record): Json<JobRecord> = r.try_get("record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn update_if(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<Option<JobRecord>, StoreError> {
        self.write(id, allowed, patch).await
    }

    fn subscribe(&self) -> broadcast::Receiver<JobRecord> {
        self.changes.subscribe()
    }
}

/// Job count per status, sampled by the metrics scrape.
pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT status, COUNT(*) AS count
        FROM generation_jobs
        GROUP BY status
        ORDER BY status
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| Ok((r.try_get("status")?, r.try_get("count")?)))
        .collect()
}
