use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::models::job::JobOutput;
use crate::models::request::{AudioRequest, GenerationRequest};
use crate::services::adapters::vertex::{store_inline_output, VertexClient};
use crate::services::adapters::{AdapterError, ModelAdapter, StartContext, StartResult};

const MODEL_ID: &str = "chirp-3-hd";
const SYNTHESIZE_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";
const DEFAULT_LANGUAGE: &str = "en-US";

/// Text-to-speech with Chirp 3 HD voices.
pub struct ChirpAdapter {
    client: Arc<VertexClient>,
}

impl ChirpAdapter {
    pub fn new(client: Arc<VertexClient>) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: Option<String>,
}

fn body(request: &AudioRequest) -> Result<Value, AdapterError> {
    let text = request
        .text
        .as_deref()
        .ok_or_else(|| AdapterError::Response("speech request has no text".to_string()))?;
    let voice = request.voice.as_deref().unwrap_or("Kore");
    let language = request.language_code.as_deref().unwrap_or(DEFAULT_LANGUAGE);

    Ok(json!({
        "input": { "text": text },
        "voice": {
            "languageCode": language,
            "name": format!("{language}-Chirp3-HD-{voice}"),
        },
        "audioConfig": { "audioEncoding": "MP3" },
    }))
}

#[async_trait]
impl ModelAdapter for ChirpAdapter {
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

        let response: SynthesizeResponse = self.client.post_json(SYNTHESIZE_URL, &body(audio)?).await?;
        let encoded = response
            .audio_content
            .ok_or_else(|| AdapterError::Response("no audioContent in synthesis response".to_string()))?;

        let output = store_inline_output(ctx, 0, &encoded, "audio/mpeg").await?;
        let raw = json!({ "audioEncoding": "MP3", "bytes": output.size });
        Ok(StartResult::complete(JobOutput::Media(vec![output]), raw))
    }
}
