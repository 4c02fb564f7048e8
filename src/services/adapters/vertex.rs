use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::job::MediaOutput;
use crate::models::media::extension_for_mime;
use crate::services::adapters::{AdapterError, StartContext};

/// Authenticated HTTP access to Vertex AI and the Text-to-Speech API.
pub struct VertexClient {
    http: Client,
    project: String,
    location: String,
    access_token: String,
}

impl VertexClient {
    pub fn new(project: &str, location: &str, access_token: &str) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(AdapterError::Http)?;
        Ok(Self {
            http,
            project: project.to_string(),
            location: location.to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// `.../publishers/google/models/{model}:{method}` on the regional endpoint.
    pub fn model_url(&self, model_id: &str, method: &str) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model_id}:{method}",
            loc = self.location,
            project = self.project,
        )
    }

    /// POST a JSON body and decode the JSON reply.
    pub async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, AdapterError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .header("x-goog-user-project", &self.project)
            .json(body)
            .send()
            .await
            .map_err(AdapterError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api {
                status: status.as_u16(),
                message: truncate(&message, 500),
            });
        }

        response.json::<R>().await.map_err(AdapterError::Http)
    }
}

/// Upload a base64 payload returned inline by a backend and describe it as an output.
pub async fn store_inline_output(
    ctx: &StartContext<'_>,
    index: usize,
    encoded: &str,
    mime_type: &str,
) -> Result<MediaOutput, AdapterError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AdapterError::Response(format!("invalid base64 payload: {e}")))?;
    let extension = extension_for_mime(mime_type).unwrap_or("bin");
    let path = ctx.output_path(index, extension);
    let uri = ctx.storage.upload(&bytes, &path, mime_type).await?;
    Ok(MediaOutput {
        uri,
        mime_type: Some(mime_type.to_string()),
        size: Some(bytes.len() as u64),
    })
}

/// Canonical name of a google.rpc status code, used as the job error code.
pub fn rpc_code_name(code: i64) -> &'static str {
    match code {
        1 => "CANCELLED",
        2 => "UNKNOWN",
        3 => "INVALID_ARGUMENT",
        4 => "DEADLINE_EXCEEDED",
        5 => "NOT_FOUND",
        7 => "PERMISSION_DENIED",
        8 => "RESOURCE_EXHAUSTED",
        9 => "FAILED_PRECONDITION",
        10 => "ABORTED",
        13 => "INTERNAL",
        14 => "UNAVAILABLE",
        16 => "UNAUTHENTICATED",
        _ => "BACKEND_ERROR",
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}
