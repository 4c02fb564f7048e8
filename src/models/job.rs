use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;


/// Error codes written into `error.code`.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const START_FAILED: &str = "START_FAILED";
    pub const AI_ANALYSIS_FAILED: &str = "AI_ANALYSIS_FAILED";
    pub const POLL_LIMIT_EXCEEDED: &str = "POLL_LIMIT_EXCEEDED";
    pub const OUTPUT_FAILED: &str = "OUTPUT_FAILED";
}

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Requested,
    Starting,
    Running,
    Succeeded,
    Failed,
    Expired,
    Canceled,
}

impl JobStatus {
    pub const NON_TERMINAL: [JobStatus; 3] = [Self::Requested, Self::Starting, Self::Running];

    pub fn is_terminal(&self) -> bool {
        !Self::NON_TERMINAL.contains(self)
    }

    /// Whether `next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Requested, Starting) => true,
            (Starting, Running) | (Starting, Succeeded) => true,
            (Running, Succeeded) | (Running, Expired) => true,
            (from, Failed) | (from, Canceled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Present when the job was submitted as free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assisted {
    pub prompt: String,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Normalized output of a generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutput {
    Media(Vec<MediaOutput>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOutput {
    pub uri: String,
    /// Omitted when the backend does not report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Omitted when the backend does not report it; never defaulted to zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    /// Backend payload as received.
    pub raw: Value,
    pub output: JobOutput,
}

/// A generated file, ready for download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFile {
    pub name: String,
    pub uri: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Only present while asynchronous work is outstanding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_poll: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<DateTime<Utc>>,
}

/// The persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Untrusted until it passes the schema validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assisted: Option<Assisted>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<JobResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<JobFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub metadata: JobMetadata,
}

impl JobRecord {
    fn blank(owner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            status: JobStatus::Requested,
            model_id: None,
            request: None,
            assisted: None,
            response: None,
            files: None,
            error: None,
            metadata: JobMetadata {
                version: crate::BUILD_VERSION.to_string(),
                created_at: now,
                updated_at: now,
                operation: None,
                ttl: None,
                attempt: None,
                next_poll: None,
                last_error: None,
            },
        }
    }

    /// A job submitted with an explicit model and structured request.
    pub fn structured(
        owner_id: impl Into<String>,
        model_id: impl Into<String>,
        request: Value,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::blank(owner_id, now);
        record.model_id = Some(model_id.into());
        record.request = Some(request);
        record
    }

    /// A job submitted as free text, to be analyzed before start.
    pub fn assisted(owner_id: impl Into<String>, prompt: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut record = Self::blank(owner_id, now);
        record.assisted = Some(Assisted {
            prompt: prompt.into(),
            reasons: Vec::new(),
        });
        record
    }

    pub fn path(&self) -> JobPath {
        JobPath::for_job(self.id)
    }

    /// True when the request still has to come out of the analyzer.
    pub fn needs_analysis(&self) -> bool {
        self.request.is_none() && self.assisted.is_some()
    }
}

/// Storage path of a job record, the only payload carried by queued tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPath(String);

impl JobPath {
    const PREFIX: &'static str = "jobs/";

    pub fn for_job(id: Uuid) -> Self {
        Self(format!("{}{}", Self::PREFIX, id))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.strip_prefix(Self::PREFIX)?;
        Uuid::parse_str(id).ok().map(Self::for_job)
    }

    pub fn job_id(&self) -> Option<Uuid> {
        self.0
            .strip_prefix(Self::PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field-path keyed partial update of a job record.
///
/// Keys are dotted paths into the record's wire shape (`"metadata.ttl"`);
/// a JSON null removes the field. Every patch stamps `metadata.updatedAt`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPatch {
    fields: Vec<(String, Value)>,
}

impl JobPatch {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            fields: vec![("metadata.updatedAt".to_string(), to_json(&now))],
        }
    }

    pub fn set(mut self, path: &str, value: impl Serialize) -> Self {
        self.fields.retain(|(p, _)| p != path);
        self.fields.push((path.to_string(), to_json(&value)));
        self
    }

    pub fn clear(mut self, path: &str) -> Self {
        self.fields.retain(|(p, _)| p != path);
        self.fields.push((path.to_string(), Value::Null));
        self
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.set("status", status)
    }

    pub fn error(self, error: JobError) -> Self {
        self.set("error", error)
    }

    /// Drop every piece of outstanding-async bookkeeping.
    pub fn clear_async(self) -> Self {
        self.clear("metadata.operation")
            .clear("metadata.ttl")
            .clear("metadata.attempt")
            .clear("metadata.nextPoll")
            .clear("metadata.lastError")
    }

    /// Status this patch writes, if any.
    pub fn target_status(&self) -> Option<JobStatus> {
        self.fields
            .iter()
            .rev()
            .find(|(p, _)| p == "status")
            .and_then(|(_, v)| serde_json::from_value(v.clone()).ok())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(p, v)| (p.as_str(), v))
    }

    /// Apply the patch to a record, returning the updated copy.
    pub fn apply(&self, record: &JobRecord) -> Result<JobRecord, serde_json::Error> {
        let mut doc = serde_json::to_value(record)?;
        for (path, value) in &self.fields {
            set_path(&mut doc, path, value.clone());
        }
        serde_json::from_value(doc)
    }
}

fn to_json(value: &impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else { return };
        if segments.peek().is_none() {
            if value.is_null() {
                map.remove(segment);
            } else {
                map.insert(segment.to_string(), value);
            }
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
