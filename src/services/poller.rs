use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::models::job::{codes, JobError, JobFile, JobPatch, JobPath, JobRecord, JobResponse, JobStatus};
use crate::services::adapters::PollResult;
use crate::services::orchestrator::{JobServices, OrchestratorError};
use crate::services::output::build_files;
use crate::services::queue::Task;

/// A delivery this much ahead of `nextPoll` is a duplicate of a tick that
/// already ran; anything closer is treated as clock skew and processed.
const EARLY_DELIVERY_TOLERANCE_SECS: i64 = 1;

/// What one poll tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Job missing, not running, or this delivery was a duplicate.
    Skipped,
    /// Backend still working; next tick scheduled.
    Pending { attempt: u32 },
    /// Poll failed transiently; next tick scheduled.
    Retrying { attempt: u32 },
    Succeeded,
    Failed { code: String },
    Expired,
}

/// Drives outstanding backend operations to a terminal state, one tick per
/// queued `Poll` task.
///
/// Two independent breakers bound a job: the absolute `metadata.ttl` and the
/// attempt ceiling.
pub struct PollScheduler {
    services: JobServices,
}

impl PollScheduler {
    pub fn new(services: JobServices) -> Self {
        Self { services }
    }

    /// Queue the next tick for `path`.
    pub async fn schedule(&self, path: &JobPath, delay: Duration) -> Result<(), OrchestratorError> {
        self.services
            .enqueue(Task::Poll { job_path: path.clone() }, delay)
            .await?;
        Ok(())
    }

    /// Re-queue a tick that did not run to completion (deadline exceeded or
    /// infrastructure error), one poll interval from now.
    pub async fn reschedule(&self, path: &JobPath, reason: &str) -> Result<(), OrchestratorError> {
        tracing::warn!(job_path = %path, reason, "Poll tick incomplete, rescheduling");
        self.schedule(path, self.services.config.poll_interval).await
    }

    pub async fn tick(&self, path: &JobPath) -> Result<TickOutcome, OrchestratorError> {
        let id = path
            .job_id()
            .ok_or_else(|| OrchestratorError::InvalidPath(path.to_string()))?;

        let Some(record) = self.services.store.get(id).await? else {
            tracing::warn!(job_id = %id, "Poll tick for missing job");
            return Ok(TickOutcome::Skipped);
        };
        if record.status != JobStatus::Running {
            tracing::debug!(job_id = %id, status = %record.status, "Poll tick on job that is not running");
            return Ok(TickOutcome::Skipped);
        }

        let now = self.services.clock.now();
        let meta = &record.metadata;

        if meta.ttl.is_some_and(|ttl| now > ttl) {
            return self.expire(id, now).await;
        }

        let attempt = meta.attempt.unwrap_or(0);
        if attempt >= self.services.config.max_poll_attempts {
            return self.poll_limit(id, attempt).await;
        }

        if let Some(next_poll) = meta.next_poll {
            if now + Duration::seconds(EARLY_DELIVERY_TOLERANCE_SECS) < next_poll {
                tracing::debug!(job_id = %id, next_poll = %next_poll, "Early poll delivery dropped");
                return Ok(TickOutcome::Skipped);
            }
        }

        let Some(operation) = meta.operation.clone() else {
            let error = JobError::new(codes::START_FAILED, "Running job has no operation handle");
            return self.fail(id, error).await;
        };
        let Some(adapter) = record
            .model_id
            .as_deref()
            .and_then(|m| self.services.registry.get_model_adapter(m))
        else {
            let error = JobError::new(codes::START_FAILED, "Running job has no usable model adapter");
            return self.fail(id, error).await;
        };

        metrics::counter!("generation_poll_attempts_total").increment(1);
        let attempt = attempt + 1;

        match adapter.poll(&operation).await {
            Err(e) => self.retry(&record, attempt, now, e.to_string()).await,
            Ok(PollResult { done: false, .. }) => self.pending(&record, attempt, now).await,
            Ok(PollResult {
                error: Some(backend), ..
            }) => {
                let error = JobError::new(backend.code, backend.message);
                self.fail(id, error).await
            }
            Ok(PollResult { data: Some(data), .. }) => {
                let files = match build_files(
                    &data.output,
                    self.services.storage.as_ref(),
                    self.services.config.signed_url_ttl,
                )
                .await
                {
                    Ok(files) => files,
                    Err(e) => {
                        let message = format!("Could not publish outputs: {e}");
                        return self.retry(&record, attempt, now, message).await;
                    }
                };
                self.succeed(&record, attempt, now, JobResponse { raw: data.raw, output: data.output }, files)
                    .await
            }
            Ok(_) => {
                let message = "Backend reported completion without a result".to_string();
                self.retry(&record, attempt, now, message).await
            }
        }
    }

    async fn expire(&self, id: Uuid, now: DateTime<Utc>) -> Result<TickOutcome, OrchestratorError> {
        let patch = JobPatch::new(now).status(JobStatus::Expired).clear_async();
        match self
            .services
            .store
            .update_if(id, &[JobStatus::Running], &patch)
            .await?
        {
            Some(_) => {
                metrics::counter!("generation_jobs_expired_total").increment(1);
                tracing::warn!(job_id = %id, "Job expired before the backend finished");
                Ok(TickOutcome::Expired)
            }
            None => Ok(TickOutcome::Skipped),
        }
    }

    async fn poll_limit(&self, id: Uuid, attempt: u32) -> Result<TickOutcome, OrchestratorError> {
        let error = JobError::new(
            codes::POLL_LIMIT_EXCEEDED,
            format!("Backend did not finish within {attempt} polls"),
        )
        .with_details(json!({ "attempts": attempt }));
        self.fail(id, error).await
    }

    async fn fail(&self, id: Uuid, error: JobError) -> Result<TickOutcome, OrchestratorError> {
        let code = error.code.clone();
        let written = self
            .services
            .record_failure(id, &[JobStatus::Running], error)
            .await?;
        Ok(match written {
            Some(_) => TickOutcome::Failed { code },
            None => TickOutcome::Skipped,
        })
    }

    /// Backend still working: count the attempt and come back later.
    async fn pending(
        &self,
        record: &JobRecord,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, OrchestratorError> {
        if attempt >= self.services.config.max_poll_attempts {
            return self.poll_limit(record.id, attempt).await;
        }
        let patch = self.bookkeeping(now, attempt);
        if !self.advance(record, &patch).await? {
            return Ok(TickOutcome::Skipped);
        }
        tracing::debug!(job_id = %record.id, attempt, "Operation still running");
        Ok(TickOutcome::Pending { attempt })
    }

    /// Transient failure: same as pending, plus `lastError`.
    async fn retry(
        &self,
        record: &JobRecord,
        attempt: u32,
        now: DateTime<Utc>,
        message: String,
    ) -> Result<TickOutcome, OrchestratorError> {
        tracing::warn!(job_id = %record.id, attempt, error = %message, "Poll attempt failed");
        if attempt >= self.services.config.max_poll_attempts {
            return self.poll_limit(record.id, attempt).await;
        }
        let patch = self.bookkeeping(now, attempt).set("metadata.lastError", now);
        if !self.advance(record, &patch).await? {
            return Ok(TickOutcome::Skipped);
        }
        Ok(TickOutcome::Retrying { attempt })
    }

    fn bookkeeping(&self, now: DateTime<Utc>, attempt: u32) -> JobPatch {
        JobPatch::new(now)
            .set("metadata.attempt", attempt)
            .set("metadata.nextPoll", now + self.services.config.poll_interval)
    }

    /// Write poll bookkeeping and queue the next tick. False if the job left `running`.
    async fn advance(&self, record: &JobRecord, patch: &JobPatch) -> Result<bool, OrchestratorError> {
        let written = self
            .services
            .store
            .update_if(record.id, &[JobStatus::Running], patch)
            .await?;
        if written.is_none() {
            return Ok(false);
        }
        self.schedule(&record.path(), self.services.config.poll_interval)
            .await?;
        Ok(true)
    }

    async fn succeed(
        &self,
        record: &JobRecord,
        attempt: u32,
        now: DateTime<Utc>,
        response: JobResponse,
        files: Option<Vec<JobFile>>,
    ) -> Result<TickOutcome, OrchestratorError> {
        let mut patch = JobPatch::new(now)
            .status(JobStatus::Succeeded)
            .set("response", &response)
            .clear_async();
        if let Some(files) = &files {
            patch = patch.set("files", files);
        }

        match self
            .services
            .store
            .update_if(record.id, &[JobStatus::Running], &patch)
            .await?
        {
            Some(_) => {
                metrics::counter!("generation_jobs_succeeded_total").increment(1);
                tracing::info!(
                    job_id = %record.id,
                    attempt,
                    files = files.as_ref().map_or(0, Vec::len),
                    "Job succeeded"
                );
                Ok(TickOutcome::Succeeded)
            }
            None => Ok(TickOutcome::Skipped),
        }
    }
}
