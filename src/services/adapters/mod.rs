//! Per-model generation adapters and the registry that allow-lists them.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use strsim::jaro_winkler;
use uuid::Uuid;

use crate::models::job::JobOutput;
use crate::models::media::MediaKind;
use crate::models::request::GenerationRequest;
use crate::services::storage::{ObjectStore, StorageError};
use crate::services::validation::{constraints_for, ModelConstraints};

pub mod chirp;
pub mod gemini;
pub mod imagen;
pub mod lyria;
pub mod vertex;
pub mod veo;

/// Similarity a model id must reach before `closest_model_id` accepts it.
const MODEL_ID_MATCH_THRESHOLD: f64 = 0.9;

/// What the orchestrator hands an adapter besides the request.
pub struct StartContext<'a> {
    pub job_id: Uuid,
    /// `gs://bucket/jobs/<id>/` where outputs of this job belong.
    pub output_prefix: &'a str,
    pub storage: &'a dyn ObjectStore,
}

impl StartContext<'_> {
    /// Object path (inside the output bucket) for the `index`-th output.
    pub fn output_path(&self, index: usize, extension: &str) -> String {
        format!("jobs/{}/file{}.{}", self.job_id, index, extension)
    }
}

/// Outcome of `start`.
///
/// Exactly one of `operation_name` (asynchronous) or `output` (synchronous)
/// must be set; anything else is a contract violation.
#[derive(Debug, Clone, PartialEq)]
pub struct StartResult {
    pub operation_name: Option<String>,
    pub output: Option<JobOutput>,
    /// Backend response, kept for `response.raw`.
    pub raw: Value,
}

impl StartResult {
    pub fn pending(operation_name: impl Into<String>, raw: Value) -> Self {
        Self {
            operation_name: Some(operation_name.into()),
            output: None,
            raw,
        }
    }

    pub fn complete(output: JobOutput, raw: Value) -> Self {
        Self {
            operation_name: None,
            output: Some(output),
            raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub code: String,
    pub message: String,
}

/// Normalized success payload of a finished operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PollData {
    pub raw: Value,
    pub output: JobOutput,
}

/// Outcome of `poll`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub done: bool,
    pub error: Option<BackendError>,
    pub data: Option<PollData>,
}

impl PollResult {
    pub fn in_progress() -> Self {
        Self {
            done: false,
            error: None,
            data: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            done: true,
            error: Some(BackendError {
                code: code.into(),
                message: message.into(),
            }),
            data: None,
        }
    }

    pub fn succeeded(output: JobOutput, raw: Value) -> Self {
        Self {
            done: true,
            error: None,
            data: Some(PollData { raw, output }),
        }
    }
}

/// Start/poll strategy for one model.
///
/// Adapters hold no mutable state between invocations.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn model_id(&self) -> &'static str;

    fn is_async(&self) -> bool {
        false
    }

    async fn start(
        &self,
        request: &GenerationRequest,
        ctx: &StartContext<'_>,
    ) -> Result<StartResult, AdapterError>;

    /// Check an outstanding operation. Only asynchronous adapters implement this.
    async fn poll(&self, operation_name: &str) -> Result<PollResult, AdapterError> {
        Err(AdapterError::PollUnsupported {
            model_id: self.model_id().to_string(),
            operation: operation_name.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected backend response: {0}")]
    Response(String),

    #[error("Output storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Request of type {found} cannot be sent to {model_id}")]
    WrongRequest { model_id: String, found: MediaKind },

    #[error("{model_id} does not poll (operation {operation})")]
    PollUnsupported { model_id: String, operation: String },
}

/// Allow-list of model identifiers and their adapters.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    adapters: HashMap<&'static str, Arc<dyn ModelAdapter>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every production adapter, sharing one Vertex client.
    pub fn vertex(client: Arc<vertex::VertexClient>) -> Self {
        let mut registry = Self::new();
        for &model in veo::MODELS {
            registry.register(Arc::new(veo::VeoAdapter::new(model, client.clone())));
        }
        for &model in imagen::MODELS {
            registry.register(Arc::new(imagen::ImagenAdapter::new(model, client.clone())));
        }
        registry.register(Arc::new(chirp::ChirpAdapter::new(client.clone())));
        registry.register(Arc::new(lyria::LyriaAdapter::new(client.clone())));
        registry.register(Arc::new(gemini::GeminiAdapter::new(client)));
        registry
    }

    /// Add (or replace) the adapter for its model id.
    pub fn register(&mut self, adapter: Arc<dyn ModelAdapter>) -> &mut Self {
        self.adapters.insert(adapter.model_id(), adapter);
        self
    }

    /// Allow-list check for a model id.
    pub fn is_valid_model_id(&self, model_id: &str) -> bool {
        self.adapters.contains_key(model_id)
    }

    pub fn get_model_adapter(&self, model_id: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(model_id).cloned()
    }

    /// Registered model ids, sorted.
    pub fn model_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.adapters.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Constraints of every registered model, in id order.
    pub fn catalog(&self) -> Vec<&'static ModelConstraints> {
        self.model_ids()
            .into_iter()
            .filter_map(constraints_for)
            .collect()
    }

    /// The registered id closest to `candidate`, if it is close enough.
    ///
    /// Exact ids are returned as-is; near misses (case, a dropped suffix) are
    /// mapped only above the similarity threshold.
    pub fn closest_model_id(&self, candidate: &str) -> Option<&'static str> {
        let candidate = candidate.trim();
        if let Some((id, _)) = self.adapters.get_key_value(candidate) {
            return Some(*id);
        }
        let lowered = candidate.to_lowercase();
        self.model_ids()
            .into_iter()
            .map(|id| (id, jaro_winkler(&lowered, id)))
            .filter(|(_, score)| *score >= MODEL_ID_MATCH_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }
}
