use genmedia_jobs::{
    config::AppConfig,
    db::{self, queries::PgJobStore},
    services::{
        adapters::{vertex::VertexClient, ModelRegistry},
        clock::{Clock, SystemClock},
        llm::WorkersAiClient,
        orchestrator::{JobServices, Orchestrator, OrchestratorError},
        poller::PollScheduler,
        queue::{RedisTaskQueue, ScheduledTask, Task, TaskQueue},
        storage::GcsClient,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

struct Worker {
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    orchestrator: Orchestrator,
    poller: PollScheduler,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!(version = genmedia_jobs::BUILD_VERSION, "Starting generation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = GcsClient::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
    )
    .expect("Failed to initialize storage client");

    let queue: Arc<dyn TaskQueue> =
        Arc::new(RedisTaskQueue::new(&config.redis_url).expect("Failed to initialize task queue"));

    let llm = WorkersAiClient::new(&config.cf_account_id, &config.cf_api_token, &config.llm_model)
        .expect("Failed to initialize Workers AI client");
    let vertex = VertexClient::new(&config.gcp_project, &config.gcp_location, &config.gcp_access_token)
        .expect("Failed to initialize Vertex AI client");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let services = JobServices {
        store: Arc::new(PgJobStore::new(db_pool)),
        queue: queue.clone(),
        storage: Arc::new(storage),
        registry: Arc::new(ModelRegistry::vertex(Arc::new(vertex))),
        clock: clock.clone(),
        config: config.job_config(),
    };

    let worker = Worker {
        queue,
        clock,
        orchestrator: Orchestrator::new(services.clone(), Arc::new(llm)),
        poller: PollScheduler::new(services),
    };
    let idle = Duration::from_millis(config.worker_idle_ms);

    tracing::info!("Worker ready, consuming tasks");

    // Main processing loop
    loop {
        match worker.process_next_task().await {
            // Task processed, continue immediately
            Ok(true) => tracing::debug!("Task processed, checking for next task"),
            Ok(false) => {
                // Nothing due, sleep before next check
                tracing::trace!("No due tasks, sleeping");
                sleep(idle).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error consuming task queue, will retry");
                sleep(idle).await;
            }
        }
    }
}

impl Worker {
    /// Claim and run the next due task.
    /// Returns Ok(true) if a task was processed, Ok(false) if none was due.
    async fn process_next_task(&self) -> Result<bool, Box<dyn std::error::Error>> {
        // Claim next due task
        let Some(scheduled) = self.queue.dequeue_due(self.clock.now()).await? else {
            return Ok(false);
        };

        let path = scheduled.task.job_path().clone();
        tracing::info!(task_id = %scheduled.id, job_path = %path, task = ?scheduled.task, "Dispatching task");

        let started = std::time::Instant::now();
        match timeout(scheduled.dispatch_deadline(), self.dispatch(&scheduled)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(job_path = %path, error = %e, "Task handler failed");
                self.recover(&scheduled.task, &e.to_string()).await?;
            }
            Err(_) => {
                tracing::error!(job_path = %path, task = ?scheduled.task, "Task exceeded its dispatch deadline");
                self.recover(&scheduled.task, "dispatch deadline exceeded").await?;
            }
        }

        tracing::debug!(
            job_path = %path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task finished"
        );
        Ok(true)
    }

    /// Polls get another tick; a start that did not finish fails its job.
    async fn recover(&self, task: &Task, reason: &str) -> Result<(), OrchestratorError> {
        match task {
            Task::Poll { job_path } => {
                self.poller.reschedule(job_path, reason).await?;
            }
            Task::Start { job_path } => {
                if self.orchestrator.abandon_start(job_path, reason).await?.is_some() {
                    tracing::warn!(job_path = %job_path, reason, "Start abandoned, job failed");
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, scheduled: &ScheduledTask) -> Result<(), OrchestratorError> {
        match &scheduled.task {
            Task::Start { job_path } => {
                let outcome = self.orchestrator.handle_created(job_path).await?;
                tracing::info!(job_path = %job_path, outcome = ?outcome, "Start handled");
            }
            Task::Poll { job_path } => {
                let outcome = self.poller.tick(job_path).await?;
                tracing::info!(job_path = %job_path, outcome = ?outcome, "Poll tick handled");
            }
        }
        Ok(())
    }
}
