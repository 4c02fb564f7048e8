//! Job lifecycle: claim, analyze, start, and branch into sync or async completion.
//!
//! Every status change is a conditional write gated on the statuses the
//! transition may leave from, so duplicate or late triggers cannot move a
//! job twice.

use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::models::job::{codes, JobError, JobPatch, JobPath, JobRecord, JobResponse, JobStatus};
use crate::services::adapters::{ModelRegistry, StartContext};
use crate::services::analyzer::RequestAnalyzer;
use crate::services::clock::Clock;
use crate::services::llm::LanguageModel;
use crate::services::output::build_files;
use crate::services::queue::{EnqueueOptions, QueueError, Task, TaskQueue};
use crate::services::storage::ObjectStore;
use crate::services::store::{JobStore, StoreError};
use crate::services::validation::validate_request;

/// Collaborators shared by the orchestrator and the poll scheduler.
#[derive(Clone)]
pub struct JobServices {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub storage: Arc<dyn ObjectStore>,
    pub registry: Arc<ModelRegistry>,
    pub clock: Arc<dyn Clock>,
    pub config: JobConfig,
}

impl JobServices {
    pub(crate) async fn enqueue(&self, task: Task, delay: chrono::Duration) -> Result<(), QueueError> {
        let dispatch_deadline = match task {
            Task::Start { .. } => self.config.start_deadline,
            Task::Poll { .. } => self.config.dispatch_deadline,
        };
        let options = EnqueueOptions { delay, dispatch_deadline };
        let scheduled = self.queue.enqueue(task, options, self.clock.now()).await?;
        tracing::debug!(task_id = %scheduled.id, due_at = %scheduled.due_at, "Task enqueued");
        Ok(())
    }

    /// Write a terminal failure if the job is still in one of `allowed`.
    pub(crate) async fn record_failure(
        &self,
        id: Uuid,
        allowed: &[JobStatus],
        error: JobError,
    ) -> Result<Option<JobRecord>, StoreError> {
        let code = error.code.clone();
        tracing::warn!(job_id = %id, code = %code, message = %error.message, "Job failed");

        let patch = JobPatch::new(self.clock.now())
            .status(JobStatus::Failed)
            .error(error)
            .clear_async();
        let written = self.store.update_if(id, allowed, &patch).await?;
        if written.is_some() {
            metrics::counter!("generation_jobs_failed_total", "code" => code).increment(1);
        }
        Ok(written)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid job path: {0}")]
    InvalidPath(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task queue error: {0}")]
    Queue(#[from] QueueError),
}

/// What a start trigger did to the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The job was not in `requested` (duplicate or late trigger) or vanished.
    Skipped,
    /// Backend operation outstanding; first poll scheduled.
    Running,
    Succeeded,
    Failed { code: String },
}

pub struct Orchestrator {
    services: JobServices,
    analyzer: RequestAnalyzer,
}

impl Orchestrator {
    pub fn new(services: JobServices, llm: Arc<dyn LanguageModel>) -> Self {
        let analyzer = RequestAnalyzer::new(llm, services.registry.clone());
        Self { services, analyzer }
    }

    pub fn services(&self) -> &JobServices {
        &self.services
    }

    /// Persist a new job and fire its record-created trigger.
    ///
    /// A job whose trigger cannot be queued is failed before the error is
    /// returned, so it never sits in `requested` with nothing to start it.
    pub async fn create_job(&self, record: JobRecord) -> Result<JobRecord, OrchestratorError> {
        self.services.store.create(&record).await?;
        if let Err(e) = self
            .services
            .enqueue(Task::Start { job_path: record.path() }, chrono::Duration::zero())
            .await
        {
            let error = JobError::new(codes::START_FAILED, format!("Could not queue start trigger: {e}"));
            self.services
                .record_failure(record.id, &[JobStatus::Requested], error)
                .await?;
            return Err(e.into());
        }

        tracing::info!(
            job_id = %record.id,
            owner_id = %record.owner_id,
            model_id = record.model_id.as_deref().unwrap_or("-"),
            assisted = record.assisted.is_some(),
            "Job created"
        );
        Ok(record)
    }

    pub async fn submit_structured(
        &self,
        owner_id: &str,
        model_id: &str,
        request: Value,
    ) -> Result<JobRecord, OrchestratorError> {
        let record = JobRecord::structured(owner_id, model_id, request, self.services.clock.now());
        self.create_job(record).await
    }

    pub async fn submit_prompt(&self, owner_id: &str, prompt: &str) -> Result<JobRecord, OrchestratorError> {
        let record = JobRecord::assisted(owner_id, prompt, self.services.clock.now());
        self.create_job(record).await
    }

    /// Handle the record-created trigger for `path`.
    ///
    /// Only the delivery whose `requested → starting` write succeeds goes on
    /// to analysis and the backend call; any other delivery is a no-op.
    pub async fn handle_created(&self, path: &JobPath) -> Result<StartOutcome, OrchestratorError> {
        let id = path
            .job_id()
            .ok_or_else(|| OrchestratorError::InvalidPath(path.to_string()))?;

        let claim = JobPatch::new(self.services.clock.now())
            .status(JobStatus::Starting)
            .set("metadata.version", crate::BUILD_VERSION);
        let Some(mut record) = self
            .services
            .store
            .update_if(id, &[JobStatus::Requested], &claim)
            .await?
        else {
            tracing::info!(job_id = %id, "Start trigger ignored, job already claimed");
            return Ok(StartOutcome::Skipped);
        };
        metrics::counter!("generation_jobs_started_total").increment(1);

        if record.needs_analysis() {
            record = match self.analyze(record).await? {
                Ok(analyzed) => analyzed,
                Err(outcome) => return Ok(outcome),
            };
        }

        self.start_job(record).await
    }

    /// Run the analyzer and write its result onto the claimed record.
    ///
    /// The inner `Err` is the outcome to report when the job did not survive
    /// analysis.
    async fn analyze(&self, record: JobRecord) -> Result<Result<JobRecord, StartOutcome>, OrchestratorError> {
        let prompt = record
            .assisted
            .as_ref()
            .map(|a| a.prompt.clone())
            .unwrap_or_default();

        match self.analyzer.analyze(&prompt, &record.owner_id).await {
            Ok(analysis) => {
                let patch = JobPatch::new(self.services.clock.now())
                    .set("modelId", analysis.model_id)
                    .set("request", &analysis.request)
                    .set("assisted.reasons", &analysis.reasons);
                let updated = self
                    .services
                    .store
                    .update_if(record.id, &[JobStatus::Starting], &patch)
                    .await?;
                Ok(updated.ok_or(StartOutcome::Skipped))
            }
            Err(failure) => {
                let code = failure.error.code();
                let mut error = JobError::new(code, format!("Prompt analysis failed: {}", failure.error));
                if let Some(details) = failure.error.details() {
                    error = error.with_details(details);
                }

                // Keep the reasoning gathered so far next to the preserved prompt.
                let reasons = JobPatch::new(self.services.clock.now()).set("assisted.reasons", &failure.reasons);
                self.services
                    .store
                    .update_if(record.id, &[JobStatus::Starting], &reasons)
                    .await?;
                self.fail(record.id, error).await
            }
        }
    }

    /// Start a claimed (`starting`) job through its model adapter.
    pub async fn start_job(&self, record: JobRecord) -> Result<StartOutcome, OrchestratorError> {
        let id = record.id;
        let services = &self.services;

        let Some(model_id) = record.model_id.as_deref() else {
            return self
                .fail_outcome(id, JobError::new(codes::START_FAILED, "Job has no model id"))
                .await;
        };
        if !services.registry.is_valid_model_id(model_id) {
            return self
                .fail_outcome(
                    id,
                    JobError::new(codes::START_FAILED, format!("Unsupported model `{model_id}`")),
                )
                .await;
        }
        let Some(adapter) = services.registry.get_model_adapter(model_id) else {
            return self
                .fail_outcome(
                    id,
                    JobError::new(codes::START_FAILED, format!("No adapter registered for `{model_id}`")),
                )
                .await;
        };

        let request_json = record.request.clone().unwrap_or(Value::Null);
        let request = match validate_request(model_id, &request_json) {
            Ok(request) => request,
            Err(e) => {
                let error = JobError::new(codes::VALIDATION_ERROR, "Request failed validation")
                    .with_details(json!({ "issues": e.messages() }));
                return self.fail_outcome(id, error).await;
            }
        };

        let output_prefix = services.config.output_prefix(id);
        let ctx = StartContext {
            job_id: id,
            output_prefix: &output_prefix,
            storage: services.storage.as_ref(),
        };

        tracing::info!(job_id = %id, model_id, "Starting generation");
        let started = match adapter.start(&request, &ctx).await {
            Ok(started) => started,
            Err(e) => {
                return self
                    .fail_outcome(id, JobError::new(codes::START_FAILED, e.to_string()))
                    .await;
            }
        };

        match (started.operation_name, started.output) {
            (Some(operation), None) if adapter.is_async() => {
                self.await_operation(id, model_id, operation).await
            }
            (None, Some(output)) => {
                let files = match build_files(&output, services.storage.as_ref(), services.config.signed_url_ttl).await {
                    Ok(files) => files,
                    Err(e) => {
                        let error = JobError::new(codes::OUTPUT_FAILED, format!("Could not publish outputs: {e}"));
                        return self.fail_outcome(id, error).await;
                    }
                };

                let mut patch = JobPatch::new(services.clock.now())
                    .status(JobStatus::Succeeded)
                    .set("response", JobResponse { raw: started.raw, output });
                if let Some(files) = &files {
                    patch = patch.set("files", files);
                }
                match services.store.update_if(id, &[JobStatus::Starting], &patch).await? {
                    Some(_) => {
                        metrics::counter!("generation_jobs_succeeded_total").increment(1);
                        tracing::info!(
                            job_id = %id,
                            model_id,
                            files = files.as_ref().map_or(0, Vec::len),
                            "Job succeeded"
                        );
                        Ok(StartOutcome::Succeeded)
                    }
                    None => Ok(StartOutcome::Skipped),
                }
            }
            (operation, output) => {
                let error = JobError::new(
                    codes::START_FAILED,
                    format!(
                        "Adapter for {model_id} returned {} operation and {} output",
                        if operation.is_some() { "an" } else { "no" },
                        if output.is_some() { "an" } else { "no" },
                    ),
                );
                self.fail_outcome(id, error).await
            }
        }
    }

    /// `starting → running` and schedule the first poll.
    async fn await_operation(
        &self,
        id: Uuid,
        model_id: &str,
        operation: String,
    ) -> Result<StartOutcome, OrchestratorError> {
        let services = &self.services;
        let config = &services.config;
        let now = services.clock.now();

        let patch = JobPatch::new(now)
            .status(JobStatus::Running)
            .set("metadata.operation", &operation)
            .set("metadata.ttl", now + config.ttl_window)
            .set("metadata.attempt", 0)
            .set("metadata.nextPoll", now + config.poll_interval);
        let Some(record) = services.store.update_if(id, &[JobStatus::Starting], &patch).await? else {
            return Ok(StartOutcome::Skipped);
        };

        if let Err(e) = services
            .enqueue(Task::Poll { job_path: record.path() }, config.poll_interval)
            .await
        {
            let error = JobError::new(codes::START_FAILED, format!("Could not schedule polling: {e}"));
            services.record_failure(id, &[JobStatus::Running], error).await?;
            return Ok(StartOutcome::Failed {
                code: codes::START_FAILED.to_string(),
            });
        }

        tracing::info!(job_id = %id, model_id, operation = %operation, "Job running");
        Ok(StartOutcome::Running)
    }

    async fn fail(&self, id: Uuid, error: JobError) -> Result<Result<JobRecord, StartOutcome>, OrchestratorError> {
        Ok(Err(self.fail_outcome(id, error).await?))
    }

    async fn fail_outcome(&self, id: Uuid, error: JobError) -> Result<StartOutcome, OrchestratorError> {
        let code = error.code.clone();
        let written = self
            .services
            .record_failure(id, &[JobStatus::Starting], error)
            .await?;
        Ok(match written {
            Some(_) => StartOutcome::Failed { code },
            None => StartOutcome::Skipped,
        })
    }

    /// Fail a job whose start task errored or ran past its deadline.
    ///
    /// Only `requested` and `starting` jobs are touched; `None` means the job
    /// already moved on.
    pub async fn abandon_start(&self, path: &JobPath, reason: &str) -> Result<Option<JobRecord>, OrchestratorError> {
        let id = path
            .job_id()
            .ok_or_else(|| OrchestratorError::InvalidPath(path.to_string()))?;
        let error = JobError::new(codes::START_FAILED, format!("Start did not complete: {reason}"));
        let failed = self
            .services
            .record_failure(id, &[JobStatus::Requested, JobStatus::Starting], error)
            .await?;
        Ok(failed)
    }

    /// External cancellation. `None` when the job is already terminal.
    pub async fn cancel(&self, id: Uuid) -> Result<Option<JobRecord>, OrchestratorError> {
        let patch = JobPatch::new(self.services.clock.now())
            .status(JobStatus::Canceled)
            .clear_async();
        let canceled = self
            .services
            .store
            .update_if(id, &JobStatus::NON_TERMINAL, &patch)
            .await?;
        if canceled.is_some() {
            tracing::info!(job_id = %id, "Job canceled");
        }
        Ok(canceled)
    }
}
