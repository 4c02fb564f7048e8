use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::models::job::JobOutput;
use crate::models::media::mime_for_path;
use crate::models::request::{GenerationRequest, TextRequest};
use crate::services::adapters::vertex::VertexClient;
use crate::services::adapters::{AdapterError, ModelAdapter, StartContext, StartResult};

const MODEL_ID: &str = "gemini-2.5-flash";

/// Text generation; the output is text only, so no files are produced.
pub struct GeminiAdapter {
    client: Arc<VertexClient>,
}

impl GeminiAdapter {
    pub fn new(client: Arc<VertexClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

fn body(request: &TextRequest) -> Value {
    let mut parts: Vec<Value> = request
        .attachments
        .iter()
        .map(|a| {
            let mime = a
                .mime_type
                .clone()
                .or_else(|| mime_for_path(&a.uri).map(str::to_string))
                .unwrap_or_else(|| "application/octet-stream".to_string());
            json!({ "fileData": { "fileUri": a.uri, "mimeType": mime } })
        })
        .collect();
    parts.push(json!({ "text": request.prompt }));

    let mut generation_config = json!({});
    if let Some(max) = request.max_output_tokens {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(t) = request.temperature {
        generation_config["temperature"] = json!(t);
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    });
    if let Some(system) = &request.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

#[async_trait]
impl ModelAdapter for GeminiAdapter {
    fn model_id(&self) -> &'static str {
        MODEL_ID
    }

    async fn start(
        &self,
        request: &GenerationRequest,
        _ctx: &StartContext<'_>,
    ) -> Result<StartResult, AdapterError> {
        let GenerationRequest::Text(text) = request else {
            return Err(AdapterError::WrongRequest {
                model_id: MODEL_ID.to_string(),
                found: request.kind(),
            });
        };

        let url = self.client.model_url(MODEL_ID, "generateContent");
        let raw: Value = self.client.post_json(&url, &body(text)).await?;
        let response: GenerateResponse = serde_json::from_value(raw.clone())
            .map_err(|e| AdapterError::Response(format!("generateContent: {e}")))?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Response("no candidates returned".to_string()))?;

        let output: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if output.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
            return Err(AdapterError::Response(format!("empty answer (finish reason {reason})")));
        }

        Ok(StartResult::complete(JobOutput::Text(output), raw))
    }
}
