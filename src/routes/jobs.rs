use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobRecord;
use crate::services::orchestrator::OrchestratorError;
use crate::services::store::StoreError;

/// Body of `POST /api/v1/jobs`: either `modelId` + `request`, or `prompt` alone.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobBody {
    #[garde(length(min = 1, max = 128))]
    pub owner_id: String,

    #[serde(default)]
    #[garde(inner(length(min = 1, max = 128)))]
    pub model_id: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub request: Option<Value>,

    #[serde(default)]
    #[garde(inner(length(min = 1, max = 20000)))]
    pub prompt: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        tracing::error!(error = %e, "Job operation failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        OrchestratorError::Store(e).into()
    }
}

/// POST /api/v1/jobs: create a job and fire its start trigger.
pub async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<JobRecord>), ApiError> {
    if let Err(report) = body.validate() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, report.to_string()));
    }

    let orchestrator = &state.orchestrator;
    let record = match (body.model_id, body.request, body.prompt) {
        (Some(model_id), Some(request), None) => {
            orchestrator
                .submit_structured(&body.owner_id, &model_id, request)
                .await?
        }
        (None, None, Some(prompt)) => orchestrator.submit_prompt(&body.owner_id, &prompt).await?,
        _ => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "provide either `modelId` and `request`, or `prompt` alone",
            ))
        }
    };

    metrics::counter!("generation_jobs_submitted_total").increment(1);
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .store
        .get(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("job {job_id} not found")))
}

/// POST /api/v1/jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    let Some(current) = state.store.get(job_id).await? else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, format!("job {job_id} not found")));
    };

    match state.orchestrator.cancel(job_id).await? {
        Some(canceled) => Ok(Json(canceled)),
        None => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("job {job_id} is already {}", current.status),
        )),
    }
}
