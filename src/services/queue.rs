use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::job::JobPath;

const TASKS_KEY: &str = "genmedia:tasks";

/// Work items carried by the delayed task queue.
///
/// Both carry only the job's storage path; handlers re-read the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Record-created trigger.
    Start { job_path: JobPath },
    /// One poll tick of an outstanding backend operation.
    Poll { job_path: JobPath },
}

impl Task {
    pub fn job_path(&self) -> &JobPath {
        match self {
            Task::Start { job_path } | Task::Poll { job_path } => job_path,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    pub delay: Duration,
    pub dispatch_deadline: Duration,
}

/// A task as stored in the queue, with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub task: Task,
    pub due_at: DateTime<Utc>,
    pub dispatch_deadline_secs: i64,
}

impl ScheduledTask {
    pub fn new(task: Task, options: EnqueueOptions, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            due_at: now + options.delay,
            dispatch_deadline_secs: options.dispatch_deadline.num_seconds(),
        }
    }

    pub fn dispatch_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.dispatch_deadline_secs.max(1) as u64)
    }
}

/// Durable delayed-task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedule `task` for delivery once `options.delay` has elapsed.
    async fn enqueue(
        &self,
        task: Task,
        options: EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTask, QueueError>;

    /// Claim the next task whose due time has passed.
    async fn dequeue_due(&self, now: DateTime<Utc>) -> Result<Option<ScheduledTask>, QueueError>;
}

/// Redis-backed delayed task queue.
///
/// Tasks live in a sorted set scored by due time (epoch milliseconds). A
/// worker owns a task once its `ZREM` of that member succeeds.
pub struct RedisTaskQueue {
    client: redis::Client,
}

impl RedisTaskQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of scheduled tasks, due or not.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.zcard(TASKS_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(
        &self,
        task: Task,
        options: EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTask, QueueError> {
        let scheduled = ScheduledTask::new(task, options, now);
        let payload = serde_json::to_string(&scheduled).map_err(QueueError::Serialize)?;
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        conn.zadd::<_, _, _, ()>(TASKS_KEY, &payload, scheduled.due_at.timestamp_millis())
            .await
            .map_err(QueueError::Redis)?;
        Ok(scheduled)
    }

    async fn dequeue_due(&self, now: DateTime<Utc>) -> Result<Option<ScheduledTask>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let due: Vec<String> = conn
            .zrangebyscore_limit(TASKS_KEY, "-inf", now.timestamp_millis(), 0, 8)
            .await
            .map_err(QueueError::Redis)?;

        for payload in due {
            let removed: i64 = conn.zrem(TASKS_KEY, &payload).await.map_err(QueueError::Redis)?;
            if removed == 0 {
                // Claimed by another worker.
                continue;
            }
            match serde_json::from_str::<ScheduledTask>(&payload) {
                Ok(task) => return Ok(Some(task)),
                Err(e) => {
                    tracing::error!(error = %e, payload = %payload, "Dropping undecodable task");
                }
            }
        }

        Ok(None)
    }
}

/// In-process delayed task queue.
#[derive(Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything still scheduled, in due order.
    pub fn pending(&self) -> Vec<ScheduledTask> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        tasks.sort_by_key(|t| t.due_at);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(
        &self,
        task: Task,
        options: EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Result<ScheduledTask, QueueError> {
        let scheduled = ScheduledTask::new(task, options, now);
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(scheduled.clone());
        Ok(scheduled)
    }

    async fn dequeue_due(&self, now: DateTime<Utc>) -> Result<Option<ScheduledTask>, QueueError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let next = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due_at <= now)
            .min_by_key(|(_, t)| t.due_at)
            .map(|(i, _)| i);
        Ok(next.map(|i| tasks.remove(i)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn options(delay_secs: i64) -> EnqueueOptions {
        EnqueueOptions {
            delay: Duration::seconds(delay_secs),
            dispatch_deadline: Duration::seconds(30),
        }
    }

    #[test]
    fn test_task_wire_shape() {
        let path = JobPath::for_job(Uuid::nil());
        let task = Task::Poll { job_path: path };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task"], "poll");
        assert_eq!(json["job_path"], "jobs/00000000-0000-0000-0000-000000000000");
    }

    #[tokio::test]
    async fn test_memory_queue_respects_delay() {
        let queue = MemoryTaskQueue::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let path = JobPath::for_job(Uuid::new_v4());
        queue
            .enqueue(Task::Poll { job_path: path.clone() }, options(10), now)
            .await
            .unwrap();

        assert!(queue.dequeue_due(now).await.unwrap().is_none());

        let due = queue
            .dequeue_due(now + Duration::seconds(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due.task, Task::Poll { job_path: path });
        assert_eq!(due.dispatch_deadline_secs, 30);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_memory_queue_delivers_in_due_order() {
        let queue = MemoryTaskQueue::new();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = JobPath::for_job(Uuid::new_v4());
        let early = JobPath::for_job(Uuid::new_v4());
        queue.enqueue(Task::Poll { job_path: late.clone() }, options(5), now).await.unwrap();
        queue.enqueue(Task::Start { job_path: early.clone() }, options(0), now).await.unwrap();

        let later = now + Duration::seconds(60);
        assert_eq!(queue.dequeue_due(later).await.unwrap().unwrap().task.job_path(), &early);
        assert_eq!(queue.dequeue_due(later).await.unwrap().unwrap().task.job_path(), &late);
    }
}
