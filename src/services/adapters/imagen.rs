use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::job::JobOutput;
use crate::models::request::{GenerationRequest, ImageRequest};
use crate::services::adapters::vertex::{store_inline_output, VertexClient};
use crate::services::adapters::{AdapterError, ModelAdapter, StartContext, StartResult};

pub const MODELS: &[&str] = &["imagen-4.0-generate-001", "imagen-4.0-fast-generate-001"];

/// Synchronous image generation; images come back inline and are uploaded here.
pub struct ImagenAdapter {
    model_id: &'static str,
    client: Arc<VertexClient>,
}

impl ImagenAdapter {
    pub fn new(model_id: &'static str, client: Arc<VertexClient>) -> Self {
        Self { model_id, client }
    }
}

#[derive(Serialize)]
struct PredictBody<'a> {
    instances: [Instance<'a>; 1],
    parameters: Parameters,
}

#[derive(Serialize)]
struct Instance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters {
    sample_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    /// A seed only takes effect without the watermark.
    #[serde(skip_serializing_if = "Option::is_none")]
    add_watermark: Option<bool>,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

fn body(request: &ImageRequest) -> PredictBody<'_> {
    PredictBody {
        instances: [Instance {
            prompt: &request.prompt,
        }],
        parameters: Parameters {
            sample_count: request.sample_count.unwrap_or(1),
            aspect_ratio: request.aspect_ratio.map(|a| a.to_string()),
            negative_prompt: request.negative_prompt.clone(),
            seed: request.seed,
            add_watermark: request.seed.map(|_| false),
        },
    }
}

#[async_trait]
impl ModelAdapter for ImagenAdapter {
    fn model_id(&self) -> &'static str {
        self.model_id
    }

    async fn start(
        &self,
        request: &GenerationRequest,
        ctx: &StartContext<'_>,
    ) -> Result<StartResult, AdapterError> {
        let GenerationRequest::Image(image) = request else {
            return Err(AdapterError::WrongRequest {
                model_id: self.model_id.to_string(),
                found: request.kind(),
            });
        };

        let url = self.client.model_url(self.model_id, "predict");
        let response: PredictResponse = self.client.post_json(&url, &body(image)).await?;

        let mut outputs = Vec::new();
        let mut filtered = Vec::new();
        for prediction in response.predictions {
            match prediction.bytes_base64_encoded {
                Some(encoded) => {
                    let mime = prediction.mime_type.as_deref().unwrap_or("image/png");
                    let index = outputs.len();
                    outputs.push(store_inline_output(ctx, index, &encoded, mime).await?);
                }
                None => filtered.extend(prediction.rai_filtered_reason),
            }
        }

        if outputs.is_empty() {
            let reason = if filtered.is_empty() {
                "no images returned".to_string()
            } else {
                filtered.join(" ")
            };
            return Err(AdapterError::Response(reason));
        }

        let raw = serde_json::json!({
            "predictions": outputs.len(),
            "filtered": filtered,
        });
        Ok(StartResult::complete(JobOutput::Media(outputs), raw))
    }
}
