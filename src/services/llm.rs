use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed seed sent with deterministic requests.
const DETERMINISTIC_SEED: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InferOptions {
    /// Greedy decoding so identical input yields identical output.
    pub deterministic: bool,
    /// Ask the model for a single JSON object.
    pub json: bool,
    pub max_tokens: Option<u32>,
}

/// Language-model inference: messages in, text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn infer(&self, messages: &[ChatMessage], options: InferOptions) -> Result<String, LlmError>;
}

/// Client for Cloudflare Workers AI chat models.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<ChatResult>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ChatResult {
    /// A string, or an already-parsed object in JSON mode.
    response: Option<Value>,
}

impl WorkersAiClient {
    pub fn new(account_id: &str, api_token: &str, model: &str) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(LlmError::Http)?;
        Ok(Self {
            http,
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for WorkersAiClient {
    async fn infer(&self, messages: &[ChatMessage], options: InferOptions) -> Result<String, LlmError> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        );

        let body = ChatRequest {
            messages,
            max_tokens: options.max_tokens.unwrap_or(1024),
            temperature: options.deterministic.then_some(0.0),
            seed: options.deterministic.then_some(DETERMINISTIC_SEED),
            response_format: options
                .json
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(LlmError::Http)?;

        let status = response.status();
        let chat: ChatResponse = response.json().await.map_err(LlmError::Http)?;
        if !status.is_success() || !chat.success {
            let message = chat
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        match chat.result.and_then(|r| r.response) {
            Some(Value::String(text)) => Ok(text),
            Some(Value::Null) | None => Err(LlmError::EmptyResponse),
            Some(other) => Ok(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Inference API returned no response text")]
    EmptyResponse,
}
