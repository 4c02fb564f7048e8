use chrono::Duration;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the job record store
    pub database_url: String,

    /// Upper bound of the Postgres pool for this process
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Redis connection string for the delayed task queue
    pub redis_url: String,

    /// Cloudflare account ID (Workers AI, used by the request analyzer)
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Workers AI chat model used by the request analyzer
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Google Cloud project hosting the generation backends
    pub gcp_project: String,

    /// Vertex AI location
    #[serde(default = "default_gcp_location")]
    pub gcp_location: String,

    /// OAuth access token for Vertex AI and Text-to-Speech
    pub gcp_access_token: String,

    /// Bucket receiving generated outputs
    pub storage_bucket: String,

    /// GCS interoperability endpoint (S3-compatible XML API)
    #[serde(default = "default_storage_endpoint")]
    pub storage_endpoint: String,

    /// HMAC access key for the interoperability endpoint
    pub storage_access_key: String,

    /// HMAC secret for the interoperability endpoint
    pub storage_secret_key: String,

    #[serde(default = "default_job_ttl_minutes")]
    pub job_ttl_minutes: i64,

    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: i64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    #[serde(default = "default_signed_url_ttl_seconds")]
    pub signed_url_ttl_seconds: i64,

    #[serde(default = "default_dispatch_deadline_seconds")]
    pub dispatch_deadline_seconds: i64,

    /// Execution bound for a start task (analysis, backend start, uploads)
    #[serde(default = "default_start_deadline_seconds")]
    pub start_deadline_seconds: i64,

    /// Worker sleep between empty queue checks
    #[serde(default = "default_worker_idle_ms")]
    pub worker_idle_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_llm_model() -> String {
    "@cf/meta/llama-3.3-70b-instruct-fp8-fast".to_string()
}

fn default_gcp_location() -> String {
    "us-central1".to_string()
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_job_ttl_minutes() -> i64 {
    90
}

fn default_poll_interval_seconds() -> i64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    600
}

fn default_signed_url_ttl_seconds() -> i64 {
    7 * 24 * 60 * 60
}

fn default_dispatch_deadline_seconds() -> i64 {
    60
}

fn default_start_deadline_seconds() -> i64 {
    600
}

fn default_worker_idle_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Lifecycle constants handed to the orchestrator and poll scheduler.
    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            ttl_window: Duration::minutes(self.job_ttl_minutes),
            poll_interval: Duration::seconds(self.poll_interval_seconds),
            max_poll_attempts: self.max_poll_attempts,
            signed_url_ttl: Duration::seconds(self.signed_url_ttl_seconds),
            dispatch_deadline: Duration::seconds(self.dispatch_deadline_seconds),
            start_deadline: Duration::seconds(self.start_deadline_seconds),
            output_bucket: self.storage_bucket.clone(),
        }
    }
}

/// Immutable lifecycle configuration.
///
/// Built once at startup and passed into the orchestrator and poll scheduler;
/// tests construct it directly with compressed windows.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Maximum lifetime of an outstanding backend operation.
    pub ttl_window: Duration,
    /// Fixed delay between poll ticks.
    pub poll_interval: Duration,
    /// Poll attempts allowed before the job fails with `POLL_LIMIT_EXCEEDED`.
    pub max_poll_attempts: u32,
    /// Lifetime of signed download URLs written into `files`.
    pub signed_url_ttl: Duration,
    /// Execution bound for a single poll tick.
    pub dispatch_deadline: Duration,
    /// Execution bound for a start task, which may run analysis and a
    /// synchronous generation before it returns.
    pub start_deadline: Duration,
    /// Bucket that receives generated outputs.
    pub output_bucket: String,
}

impl JobConfig {
    /// Storage prefix for a job's outputs, e.g. `gs://bucket/jobs/<id>/`.
    pub fn output_prefix(&self, job_id: uuid::Uuid) -> String {
        format!("gs://{}/jobs/{}/", self.output_bucket, job_id)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            ttl_window: Duration::minutes(default_job_ttl_minutes()),
            poll_interval: Duration::seconds(default_poll_interval_seconds()),
            max_poll_attempts: default_max_poll_attempts(),
            signed_url_ttl: Duration::seconds(default_signed_url_ttl_seconds()),
            dispatch_deadline: Duration::seconds(default_dispatch_deadline_seconds()),
            start_deadline: Duration::seconds(default_start_deadline_seconds()),
            output_bucket: "genmedia-outputs".to_string(),
        }
    }
}
