use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::job::{JobPatch, JobRecord, JobStatus};

/// Capacity of the change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Record store holding job records.
///
/// Updates to a single record are serialized by the store; `update_if` is
/// the status-gated conditional write every lifecycle transition goes through.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Apply `patch` only while the record's status is one of `allowed`.
    ///
    /// Returns `None` when the record was in any other status.
    async fn update_if(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Change notifications for records written through this store.
    fn subscribe(&self) -> broadcast::Receiver<JobRecord>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// In-process record store.
pub struct MemoryJobStore {
    records: Mutex<HashMap<Uuid, JobRecord>>,
    changes: broadcast::Sender<JobRecord>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn write(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let current = records.get(&id).ok_or(StoreError::NotFound(id))?;
        if !allowed.contains(&current.status) {
            return Ok(None);
        }
        let updated = patch.apply(current)?;
        records.insert(id, updated.clone());
        let _ = self.changes.send(updated.clone());
        Ok(Some(updated))
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id, record.clone());
        let _ = self.changes.send(record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(&id).cloned())
    }

    async fn update_if(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<Option<JobRecord>, StoreError> {
        self.write(id, allowed, patch)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobRecord> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_conditional_update_only_applies_in_allowed_status() {
        let store = MemoryJobStore::new();
        let record = JobRecord::assisted("user-1", "a cat", Utc::now());
        store.create(&record).await.unwrap();

        let claim = JobPatch::new(Utc::now()).status(JobStatus::Starting);
        let first = store
            .update_if(record.id, &[JobStatus::Requested], &claim)
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.status), Some(JobStatus::Starting));

        let second = store
            .update_if(record.id, &[JobStatus::Requested], &claim)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_of_missing_job() {
        let store = MemoryJobStore::new();
        let err = store
            .update_if(Uuid::new_v4(), &JobStatus::NON_TERMINAL, &JobPatch::new(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryJobStore::new();
        let record = JobRecord::assisted("user-1", "a cat", Utc::now());
        store.create(&record).await.unwrap();
        assert!(matches!(
            store.create(&record).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribers_see_writes() {
        let store = MemoryJobStore::new();
        let mut changes = store.subscribe();
        let record = JobRecord::assisted("user-1", "a cat", Utc::now());
        store.create(&record).await.unwrap();
        store
            .update_if(
                record.id,
                &JobStatus::NON_TERMINAL,
                &JobPatch::new(Utc::now()).status(JobStatus::Canceled),
            )
            .await
            .unwrap();

        assert_eq!(changes.recv().await.unwrap().status, JobStatus::Requested);
        assert_eq!(changes.recv().await.unwrap().status, JobStatus::Canceled);
    }
}
