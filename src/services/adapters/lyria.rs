use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::models::job::JobOutput;
use crate::models::request::{AudioRequest, GenerationRequest};
use crate::services::adapters::vertex::{store_inline_output, VertexClient};
use crate::services::adapters::{AdapterError, ModelAdapter, StartContext, StartResult};

const MODEL_ID: &str = "lyria-002";

/// Instrumental music generation. Returns WAV clips inline.
pub struct LyriaAdapter {
    client: Arc<VertexClient>,
}

impl LyriaAdapter {
    pub fn new(client: Arc<VertexClient>) -> Self {
        Self { client }
    }
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
}

fn body(request: &AudioRequest) -> Value {
    let mut instance = json!({ "prompt": request.prompt.clone().unwrap_or_default() });
    if let Some(negative) = &request.negative_prompt {
        instance["negative_prompt"] = json!(negative);
    }
    // Lyria rejects `seed` together with `sample_count`.
    match request.seed {
        Some(seed) => {
            instance["seed"] = json!(seed);
            json!({ "instances": [instance], "parameters": {} })
        }
        None => json!({ "instances": [instance], "parameters": { "sample_count": 1 } }),
    }
}

#[async_trait]
impl ModelAdapter for LyriaAdapter {
    fn model_id(&self) -> &'static str {
        MODEL_ID
    }

    async fn start(
        &self,
        request: &GenerationRequest,
        ctx: &StartContext<'_>,
    ) -> Result<StartResult, AdapterError> {
        let GenerationRequest::Audio(audio) = request else {
            return Err(AdapterError::WrongRequest {
                model_id: MODEL_ID.to_string(),
                found: request.kind(),
            });
        };

        let url = self.client.model_url(MODEL_ID, "predict");
        let response: PredictResponse = self.client.post_json(&url, &body(audio)).await?;

        let mut outputs = Vec::new();
        for prediction in response.predictions {
            let Some(encoded) = prediction.bytes_base64_encoded else {
                continue;
            };
            let mime = prediction.mime_type.as_deref().unwrap_or("audio/wav");
            let index = outputs.len();
            outputs.push(store_inline_output(ctx, index, &encoded, mime).await?);
        }

        if outputs.is_empty() {
            return Err(AdapterError::Response("no audio clips returned".to_string()));
        }

        let raw = json!({ "predictions": outputs.len() });
        Ok(StartResult::complete(JobOutput::Media(outputs), raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(seed: Option<u32>) -> AudioRequest {
        AudioRequest {
            prompt: Some("calm piano".to_string()),
            text: None,
            voice: None,
            language_code: None,
            negative_prompt: Some("drums".to_string()),
            seed,
        }
    }

    #[test]
    fn test_seed_and_sample_count_are_exclusive() {
        let seeded = body(&request(Some(9)));
        assert_eq!(seeded["instances"][0]["seed"], 9);
        assert!(seeded["parameters"].get("sample_count").is_none());

        let unseeded = body(&request(None));
        assert_eq!(unseeded["parameters"]["sample_count"], 1);
        assert_eq!(unseeded["instances"][0]["negative_prompt"], "drums");
    }
}
