use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::models::job::{JobOutput, MediaOutput};
use crate::models::request::{GenerationRequest, VideoRequest};
use crate::services::adapters::vertex::{rpc_code_name, VertexClient};
use crate::services::adapters::{AdapterError, ModelAdapter, PollResult, StartContext, StartResult};

pub const MODELS: &[&str] = &[
    "veo-2.0-generate-001",
    "veo-3.0-generate-001",
    "veo-3.0-fast-generate-001",
];

/// Long-running video generation on Vertex AI.
///
/// Videos are written by the backend straight into the job's output prefix.
pub struct VeoAdapter {
    model_id: &'static str,
    client: Arc<VertexClient>,
}

impl VeoAdapter {
    pub fn new(model_id: &'static str, client: Arc<VertexClient>) -> Self {
        Self { model_id, client }
    }

    fn native_audio(&self) -> bool {
        self.model_id.starts_with("veo-3")
    }

    fn build_body(&self, request: &VideoRequest, output_prefix: &str) -> PredictBody {
        PredictBody {
            instances: vec![Instance {
                prompt: request.prompt.clone(),
                image: request.image.as_ref().map(|image| InstanceImage {
                    gcs_uri: image.uri.clone(),
                    mime_type: image.mime_type.clone().unwrap_or_else(|| "image/png".to_string()),
                }),
            }],
            parameters: Parameters {
                storage_uri: output_prefix.to_string(),
                sample_count: request.sample_count.unwrap_or(1),
                duration_seconds: request.duration_seconds,
                aspect_ratio: request.aspect_ratio.map(|a| a.to_string()),
                resolution: request.resolution.map(|r| r.to_string()),
                negative_prompt: request.negative_prompt.clone(),
                // Veo 3 requires the flag; earlier models reject it.
                generate_audio: self
                    .native_audio()
                    .then(|| request.generate_audio.unwrap_or(true)),
                seed: request.seed,
            },
        }
    }
}

#[derive(Serialize)]
struct PredictBody {
    instances: Vec<Instance>,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Instance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<InstanceImage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceImage {
    gcs_uri: String,
    mime_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters {
    storage_uri: String,
    sample_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
}

#[derive(Deserialize)]
struct OperationHandle {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<OperationResponse>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    videos: Vec<GeneratedVideo>,
    #[serde(default)]
    rai_media_filtered_count: u32,
    #[serde(default)]
    rai_media_filtered_reasons: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedVideo {
    gcs_uri: Option<String>,
    mime_type: Option<String>,
}

/// Map a fetched operation onto the poll contract.
fn interpret_operation(raw: Value) -> Result<PollResult, AdapterError> {
    let op: Operation = serde_json::from_value(raw.clone())
        .map_err(|e| AdapterError::Response(format!("operation: {e}")))?;

    if !op.done {
        return Ok(PollResult::in_progress());
    }
    if let Some(error) = op.error {
        return Ok(PollResult::failed(rpc_code_name(error.code), error.message));
    }

    let response = op
        .response
        .ok_or_else(|| AdapterError::Response("finished operation has no response".to_string()))?;

    let media: Vec<MediaOutput> = response
        .videos
        .into_iter()
        .filter_map(|v| {
            v.gcs_uri.map(|uri| MediaOutput {
                uri,
                mime_type: v.mime_type.or_else(|| Some("video/mp4".to_string())),
                size: None,
            })
        })
        .collect();

    if media.is_empty() {
        if response.rai_media_filtered_count > 0 {
            let reasons = response.rai_media_filtered_reasons.join(" ");
            return Ok(PollResult::failed(
                "CONTENT_FILTERED",
                if reasons.is_empty() {
                    "All generated videos were blocked by safety filters".to_string()
                } else {
                    reasons
                },
            ));
        }
        return Err(AdapterError::Response("finished operation returned no videos".to_string()));
    }

    Ok(PollResult::succeeded(JobOutput::Media(media), raw))
}

#[async_trait]
impl ModelAdapter for VeoAdapter {
    fn model_id(&self) -> &'static str {
        self.model_id
    }

    fn is_async(&self) -> bool {
        true
    }

    async fn start(
        &self,
        request: &GenerationRequest,
        ctx: &StartContext<'_>,
    ) -> Result<StartResult, AdapterError> {
        let GenerationRequest::Video(video) = request else {
            return Err(AdapterError::WrongRequest {
                model_id: self.model_id.to_string(),
                found: request.kind(),
            });
        };

        let body = self.build_body(video, ctx.output_prefix);
        let url = self.client.model_url(self.model_id, "predictLongRunning");
        let raw: Value = self.client.post_json(&url, &body).await?;
        let handle: OperationHandle = serde_json::from_value(raw.clone())
            .map_err(|e| AdapterError::Response(format!("operation handle: {e}")))?;

        tracing::info!(
            job_id = %ctx.job_id,
            model_id = self.model_id,
            operation = %handle.name,
            "Video generation submitted"
        );

        Ok(StartResult::pending(handle.name, raw))
    }

    async fn poll(&self, operation_name: &str) -> Result<PollResult, AdapterError> {
        let url = self.client.model_url(self.model_id, "fetchPredictOperation");
        let raw: Value = self
            .client
            .post_json(&url, &serde_json::json!({ "operationName": operation_name }))
            .await?;
        interpret_operation(raw)
    }
}
