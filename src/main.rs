use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use genmedia_jobs::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries::PgJobStore},
    routes::{self, metrics::MetricsState},
    services::{
        adapters::{vertex::VertexClient, ModelRegistry},
        clock::SystemClock,
        llm::WorkersAiClient,
        orchestrator::{JobServices, Orchestrator},
        queue::RedisTaskQueue,
        storage::GcsClient,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(version = genmedia_jobs::BUILD_VERSION, "Initializing genmedia-jobs API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "generation_jobs_submitted_total",
        "Jobs accepted through the HTTP API"
    );
    metrics::describe_counter!(
        "generation_jobs_started_total",
        "Jobs claimed by a start trigger"
    );
    metrics::describe_counter!(
        "generation_jobs_succeeded_total",
        "Jobs that reached succeeded"
    );
    metrics::describe_counter!(
        "generation_jobs_failed_total",
        "Jobs that reached failed, by error code"
    );
    metrics::describe_counter!(
        "generation_jobs_expired_total",
        "Asynchronous jobs that outlived their TTL"
    );
    metrics::describe_gauge!(
        "generation_queue_depth",
        "Scheduled start and poll tasks"
    );
    metrics::describe_gauge!("generation_jobs", "Job records per status");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL record store");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize object storage client
    let storage = GcsClient::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
    )
    .expect("Failed to initialize storage client");
    tracing::info!(bucket = %storage.bucket_name(), "Object storage ready");

    // Initialize Redis task queue
    tracing::info!("Connecting to Redis task queue");
    let queue = Arc::new(RedisTaskQueue::new(&config.redis_url).expect("Failed to initialize task queue"));

    // Initialize Workers AI and Vertex AI clients
    let llm = WorkersAiClient::new(&config.cf_account_id, &config.cf_api_token, &config.llm_model)
        .expect("Failed to initialize Workers AI client");
    let vertex = VertexClient::new(&config.gcp_project, &config.gcp_location, &config.gcp_access_token)
        .expect("Failed to initialize Vertex AI client");

    // Create shared application state
    let store = Arc::new(PgJobStore::new(db_pool.clone()));
    let services = JobServices {
        store: store.clone(),
        queue: queue.clone(),
        storage: Arc::new(storage),
        registry: Arc::new(ModelRegistry::vertex(Arc::new(vertex))),
        clock: Arc::new(SystemClock),
        config: config.job_config(),
    };
    let orchestrator = Orchestrator::new(services, Arc::new(llm));

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        db: db_pool.clone(),
        queue: queue.clone(),
    };
    let state = AppState::new(db_pool, queue, store, orchestrator);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::create_job))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(routes::jobs::cancel_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
