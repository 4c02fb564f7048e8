use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

use crate::db::queries::count_by_status;
use crate::services::queue::RedisTaskQueue;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub db: PgPool,
    pub queue: Arc<RedisTaskQueue>,
}

/// Prometheus scrape endpoint.
///
/// Queue depth and per-status job counts are sampled at scrape time.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("generation_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Could not sample queue depth"),
    }
    match count_by_status(&state.db).await {
        Ok(counts) => {
            for (status, count) in counts {
                metrics::gauge!("generation_jobs", "status" => status).set(count as f64);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not sample job counts"),
    }
    state.handle.render()
}
