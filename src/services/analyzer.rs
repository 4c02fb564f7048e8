//! Free-text prompt → validated structured request.
//!
//! Passes, in order:
//! 1. storage references are tagged with typed placeholders
//! 2. a deterministic language-model call picks the model and sketches parameters
//! 3. a second call fills in the model's request shape
//! 4. placeholders are resolved and the request is run through the validator
//!
//! Nothing is written to the job record here; the orchestrator owns that.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::models::job::codes;
use crate::models::media::MediaKind;
use crate::services::adapters::ModelRegistry;
use crate::services::llm::{ChatMessage, InferOptions, LanguageModel, LlmError};
use crate::services::references::{resolve_placeholders, tag_references, ResolveError, TaggedReference};
use crate::services::validation::{constraints_for, schema_hint, validate_request, ValidationError};

const CANDIDATE_SYSTEM_PROMPT: &str = concat!(
    "You route media generation requests to a model. ",
    "Pick exactly one model id from the catalog that can fulfil the user's request. ",
    "Storage references appear as placeholder tokens like <<ref_0_image>>; keep them verbatim. ",
    "Reply with a single JSON object: ",
    r#"{"modelId": string, "type": "video"|"image"|"audio"|"text", "parameters": object, "reason": string}. "#,
    "`parameters` is a rough sketch of the settings the user asked for (duration, aspect ratio, voice, ...). ",
    "`reason` is one sentence explaining the choice."
);

const STRUCTURED_SYSTEM_PROMPT: &str = concat!(
    "You write the request body for a media generation model. ",
    "Use only the fields listed in the schema and only the allowed values. ",
    "Omit optional fields the user did not ask for. ",
    "Where the user refers to a file, use its placeholder token exactly as given. ",
    r#"Reply with a single JSON object: {"request": object, "reason": string}."#
);

/// Outcome of a successful analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub model_id: &'static str,
    /// Validated request in its canonical wire form, `type` included.
    pub request: Value,
    /// Reasoning trail, in pass order.
    pub reasons: Vec<String>,
    pub references: Vec<TaggedReference>,
}

/// A failed analysis, with whatever reasoning was produced before it failed.
#[derive(Debug)]
pub struct AnalysisFailure {
    pub error: AnalyzeError,
    pub reasons: Vec<String>,
}

impl AnalysisFailure {
    fn new(error: AnalyzeError, reasons: Vec<String>) -> Self {
        Self { error, reasons }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("language model returned malformed output: {0}")]
    Malformed(String),

    #[error("language model chose unsupported model `{0}`")]
    UnknownModel(String),

    #[error("model {model_id} generates {expected}, not {requested}")]
    KindMismatch {
        model_id: &'static str,
        expected: MediaKind,
        requested: MediaKind,
    },

    #[error(transparent)]
    Placeholder(#[from] ResolveError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AnalyzeError {
    /// Job error code this failure is recorded under.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzeError::EmptyPrompt | AnalyzeError::Validation(_) => codes::VALIDATION_ERROR,
            _ => codes::AI_ANALYSIS_FAILED,
        }
    }

    /// Structured detail for `error.details`.
    pub fn details(&self) -> Option<Value> {
        match self {
            AnalyzeError::Validation(e) => Some(json!({ "issues": e.messages() })),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    model_id: String,
    #[serde(default, rename = "type")]
    kind: Option<MediaKind>,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Structured {
    request: Value,
    #[serde(default)]
    reason: Option<String>,
}

pub struct RequestAnalyzer {
    llm: Arc<dyn LanguageModel>,
    registry: Arc<ModelRegistry>,
}

impl RequestAnalyzer {
    pub fn new(llm: Arc<dyn LanguageModel>, registry: Arc<ModelRegistry>) -> Self {
        Self { llm, registry }
    }

    pub async fn analyze(&self, prompt: &str, owner_id: &str) -> Result<Analysis, AnalysisFailure> {
        let started = Instant::now();
        let result = self.run(prompt).await;
        let outcome = if result.is_ok() { "ok" } else { "failed" };
        metrics::histogram!("request_analysis_seconds", "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(analysis) => tracing::info!(
                owner_id,
                model_id = analysis.model_id,
                references = analysis.references.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Prompt analyzed"
            ),
            Err(failure) => tracing::warn!(
                owner_id,
                error = %failure.error,
                code = failure.error.code(),
                "Prompt analysis failed"
            ),
        }
        result
    }

    async fn run(&self, prompt: &str) -> Result<Analysis, AnalysisFailure> {
        let mut reasons = Vec::new();
        if prompt.trim().is_empty() {
            return Err(AnalysisFailure::new(AnalyzeError::EmptyPrompt, reasons));
        }

        let tagged = tag_references(prompt);
        tracing::debug!(references = tagged.references.len(), "References tagged");

        let candidate = match self.select_candidate(&tagged.text, &tagged.references).await {
            Ok(c) => c,
            Err(e) => return Err(AnalysisFailure::new(e, reasons)),
        };
        let (model_id, sketch) = match self.normalize_candidate(candidate, &mut reasons) {
            Ok(selected) => selected,
            Err(e) => return Err(AnalysisFailure::new(e, reasons)),
        };

        let structured = match self.generate_request(model_id, &tagged.text, &sketch).await {
            Ok(s) => s,
            Err(e) => return Err(AnalysisFailure::new(e, reasons)),
        };
        if let Some(reason) = structured.reason.filter(|r| !r.trim().is_empty()) {
            reasons.push(reason);
        }

        match finalize(model_id, structured.request, &tagged.references) {
            Ok(request) => Ok(Analysis {
                model_id,
                request,
                reasons,
                references: tagged.references,
            }),
            Err(e) => Err(AnalysisFailure::new(e, reasons)),
        }
    }

    async fn select_candidate(
        &self,
        text: &str,
        references: &[TaggedReference],
    ) -> Result<Candidate, AnalyzeError> {
        let catalog: Vec<Value> = self
            .registry
            .catalog()
            .into_iter()
            .map(|c| json!({ "modelId": c.model_id, "type": c.kind, "summary": c.summary }))
            .collect();
        let refs: Vec<Value> = references
            .iter()
            .map(|r| json!({ "token": r.placeholder(), "type": r.kind }))
            .collect();

        let user = json!({ "catalog": catalog, "references": refs, "prompt": text });
        let messages = [
            ChatMessage::system(CANDIDATE_SYSTEM_PROMPT),
            ChatMessage::user(user.to_string()),
        ];
        let options = InferOptions {
            deterministic: true,
            json: true,
            max_tokens: Some(512),
        };
        let reply = self.llm.infer(&messages, options).await?;
        parse_json_reply(&reply)
    }

    /// Map the candidate onto a registered model and check its media kind.
    fn normalize_candidate(
        &self,
        candidate: Candidate,
        reasons: &mut Vec<String>,
    ) -> Result<(&'static str, Value), AnalyzeError> {
        let model_id = self
            .registry
            .closest_model_id(&candidate.model_id)
            .ok_or_else(|| AnalyzeError::UnknownModel(candidate.model_id.clone()))?;
        let constraints =
            constraints_for(model_id).ok_or_else(|| AnalyzeError::UnknownModel(model_id.to_string()))?;

        if let Some(requested) = candidate.kind {
            if requested != constraints.kind {
                return Err(AnalyzeError::KindMismatch {
                    model_id,
                    expected: constraints.kind,
                    requested,
                });
            }
        }

        let reason = candidate
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("Selected {model_id} for a {} request.", constraints.kind));
        reasons.push(reason);
        if model_id != candidate.model_id.trim() {
            reasons.push(format!("Model id `{}` normalized to `{model_id}`.", candidate.model_id));
        }

        Ok((model_id, candidate.parameters))
    }

    async fn generate_request(
        &self,
        model_id: &'static str,
        text: &str,
        sketch: &Value,
    ) -> Result<Structured, AnalyzeError> {
        let schema = schema_hint(model_id).ok_or_else(|| AnalyzeError::UnknownModel(model_id.to_string()))?;
        let user = json!({
            "modelId": model_id,
            "schema": schema,
            "sketch": sketch,
            "prompt": text,
        });
        let messages = [
            ChatMessage::system(STRUCTURED_SYSTEM_PROMPT),
            ChatMessage::user(user.to_string()),
        ];
        let options = InferOptions {
            deterministic: true,
            json: true,
            max_tokens: Some(1024),
        };
        let reply = self.llm.infer(&messages, options).await?;
        let structured: Structured = parse_json_reply(&reply)?;
        if !structured.request.is_object() {
            return Err(AnalyzeError::Malformed("`request` is not an object".to_string()));
        }
        Ok(structured)
    }
}

/// Resolve placeholders, fill in the discriminator and validate.
fn finalize(
    model_id: &'static str,
    request: Value,
    references: &[TaggedReference],
) -> Result<Value, AnalyzeError> {
    let mut resolved = resolve_placeholders(&request, references)?;
    if let (Value::Object(fields), Some(constraints)) = (&mut resolved, constraints_for(model_id)) {
        fields
            .entry("type")
            .or_insert_with(|| json!(constraints.kind));
    }

    let validated = validate_request(model_id, &resolved)?;
    serde_json::to_value(&validated).map_err(|e| AnalyzeError::Malformed(e.to_string()))
}

/// Decode a JSON object from a model reply, tolerating code fences and chatter.
fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, AnalyzeError> {
    let trimmed = reply.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let body = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => return Err(AnalyzeError::Malformed("no JSON object in reply".to_string())),
    };
    serde_json::from_str(body).map_err(|e| AnalyzeError::Malformed(e.to_string()))
}
