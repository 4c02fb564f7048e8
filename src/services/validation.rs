use garde::Validate;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::fmt;

use crate::models::media::{kind_for_mime, MediaKind};
use crate::models::request::{
    AspectRatio, AudioRequest, GenerationRequest, ImageRequest, MediaRef, Resolution, TextRequest,
    VideoRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// Text-to-speech: `text` + `voice`.
    Speech,
    /// Music from a `prompt`.
    Music,
}

/// Request shape and value limits accepted by one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelConstraints {
    pub model_id: &'static str,
    pub kind: MediaKind,
    /// One-line description offered to the request analyzer.
    pub summary: &'static str,
    pub durations_seconds: &'static [u32],
    pub resolutions: &'static [Resolution],
    pub aspect_ratios: &'static [AspectRatio],
    pub max_samples: u32,
    pub accepts_image_input: bool,
    pub accepts_attachments: bool,
    pub generates_audio: bool,
    pub audio_mode: Option<AudioMode>,
    pub voices: &'static [&'static str],
}

const BASE: ModelConstraints = ModelConstraints {
    model_id: "",
    kind: MediaKind::File,
    summary: "",
    durations_seconds: &[],
    resolutions: &[],
    aspect_ratios: &[],
    max_samples: 1,
    accepts_image_input: false,
    accepts_attachments: false,
    generates_audio: false,
    audio_mode: None,
    voices: &[],
};

const VIDEO_ASPECTS: &[AspectRatio] = &[AspectRatio::Landscape, AspectRatio::Portrait];
const IMAGE_ASPECTS: &[AspectRatio] = &[
    AspectRatio::Square,
    AspectRatio::StandardPortrait,
    AspectRatio::Standard,
    AspectRatio::Portrait,
    AspectRatio::Landscape,
];
pub const CHIRP_VOICES: &[&str] = &[
    "Aoede", "Charon", "Fenrir", "Kore", "Leda", "Orus", "Puck", "Zephyr",
];

pub const MODEL_CONSTRAINTS: &[ModelConstraints] = &[
    ModelConstraints {
        model_id: "veo-2.0-generate-001",
        kind: MediaKind::Video,
        summary: "Video from text or a starting image, 5-8 seconds, 720p, silent.",
        durations_seconds: &[5, 6, 7, 8],
        resolutions: &[Resolution::Hd],
        aspect_ratios: VIDEO_ASPECTS,
        max_samples: 4,
        accepts_image_input: true,
        ..BASE
    },
    ModelConstraints {
        model_id: "veo-3.0-generate-001",
        kind: MediaKind::Video,
        summary: "Highest quality video with native audio, 4/6/8 seconds, 720p or 1080p.",
        durations_seconds: &[4, 6, 8],
        resolutions: &[Resolution::Hd, Resolution::FullHd],
        aspect_ratios: VIDEO_ASPECTS,
        max_samples: 2,
        accepts_image_input: true,
        generates_audio: true,
        ..BASE
    },
    ModelConstraints {
        model_id: "veo-3.0-fast-generate-001",
        kind: MediaKind::Video,
        summary: "Faster, cheaper video with native audio, 4/6/8 seconds, 720p or 1080p.",
        durations_seconds: &[4, 6, 8],
        resolutions: &[Resolution::Hd, Resolution::FullHd],
        aspect_ratios: VIDEO_ASPECTS,
        max_samples: 2,
        accepts_image_input: true,
        generates_audio: true,
        ..BASE
    },
    ModelConstraints {
        model_id: "imagen-4.0-generate-001",
        kind: MediaKind::Image,
        summary: "Photorealistic or illustrated still images from text.",
        aspect_ratios: IMAGE_ASPECTS,
        max_samples: 4,
        ..BASE
    },
    ModelConstraints {
        model_id: "imagen-4.0-fast-generate-001",
        kind: MediaKind::Image,
        summary: "Quick draft images from text.",
        aspect_ratios: IMAGE_ASPECTS,
        max_samples: 4,
        ..BASE
    },
    ModelConstraints {
        model_id: "chirp-3-hd",
        kind: MediaKind::Audio,
        summary: "Spoken narration of a given text in a chosen voice.",
        audio_mode: Some(AudioMode::Speech),
        voices: CHIRP_VOICES,
        ..BASE
    },
    ModelConstraints {
        model_id: "lyria-002",
        kind: MediaKind::Audio,
        summary: "Instrumental music (about 30 seconds) from a description.",
        audio_mode: Some(AudioMode::Music),
        ..BASE
    },
    ModelConstraints {
        model_id: "gemini-2.5-flash",
        kind: MediaKind::Text,
        summary: "Written answers, scripts or descriptions, optionally about attached files.",
        accepts_attachments: true,
        ..BASE
    },
];

pub fn constraints_for(model_id: &str) -> Option<&'static ModelConstraints> {
    MODEL_CONSTRAINTS.iter().find(|c| c.model_id == model_id)
}

/// One problem found in a request, qualified by its field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid request: {}", format_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue {
                path: path.into(),
                message: message.into(),
            }],
        }
    }

    /// Issue list as `path: message` strings, for `error.details`.
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

#[derive(Default)]
struct Issues(Vec<FieldIssue>);

impl Issues {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    fn finish<T>(self, value: T) -> Result<T, ValidationError> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(ValidationError { issues: self.0 })
        }
    }
}

/// Validate an untrusted structured request against the shape `model_id` expects.
///
/// Checks, in order:
/// - the `type` discriminator matches the model's media kind
/// - the variant's fields deserialize (unknown fields are rejected)
/// - field-level length and range rules
/// - the model's enumerated values (durations, resolutions, aspect ratios,
///   sample count, audio, reference inputs, voices)
pub fn validate_request(model_id: &str, request: &Value) -> Result<GenerationRequest, ValidationError> {
    let constraints = constraints_for(model_id)
        .ok_or_else(|| ValidationError::single("modelId", format!("unknown model `{model_id}`")))?;

    let Value::Object(fields) = request else {
        return Err(ValidationError::single("request", "must be an object"));
    };

    let mut body = fields.clone();
    let declared = body.remove("type");
    match declared.as_ref().and_then(Value::as_str) {
        Some(t) if t == constraints.kind.to_string() => {}
        Some(t) => {
            return Err(ValidationError::single(
                "request.type",
                format!("`{t}` does not match model {model_id}, expected `{}`", constraints.kind),
            ))
        }
        None => {
            return Err(ValidationError::single(
                "request.type",
                format!("required, expected `{}`", constraints.kind),
            ))
        }
    }

    let parsed = match constraints.kind {
        MediaKind::Video => parse_variant::<VideoRequest>(body).map(GenerationRequest::Video),
        MediaKind::Image => parse_variant::<ImageRequest>(body).map(GenerationRequest::Image),
        MediaKind::Audio => parse_variant::<AudioRequest>(body).map(GenerationRequest::Audio),
        MediaKind::Text => parse_variant::<TextRequest>(body).map(GenerationRequest::Text),
        MediaKind::File => Err(ValidationError::single("request.type", "unsupported media type")),
    }?;

    let mut issues = Issues::default();
    check_model_constraints(constraints, &parsed, &mut issues);
    issues.finish(parsed)
}

fn parse_variant<T>(body: Map<String, Value>) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate<Context = ()>,
{
    let parsed: T = serde_json::from_value(Value::Object(body)).map_err(|e| {
        let message = e.to_string();
        let path = field_in_serde_message(&message)
            .map(|f| format!("request.{f}"))
            .unwrap_or_else(|| "request".to_string());
        ValidationError::single(path, message)
    })?;

    if let Err(report) = parsed.validate() {
        let mut issues = Issues::default();
        for (path, error) in report.iter() {
            issues.push(format!("request.{path}"), error.to_string());
        }
        return issues.finish(parsed);
    }
    Ok(parsed)
}

/// Field named by serde's "unknown field `x`" / "missing field `x`" messages.
fn field_in_serde_message(message: &str) -> Option<&str> {
    let rest = message
        .strip_prefix("unknown field `")
        .or_else(|| message.strip_prefix("missing field `"))?;
    rest.split('`').next()
}

fn one_of<T: fmt::Display>(allowed: &[T]) -> String {
    let list = allowed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("must be one of {list}")
}

fn check_model_constraints(c: &ModelConstraints, request: &GenerationRequest, issues: &mut Issues) {
    match request {
        GenerationRequest::Video(v) => {
            if let Some(d) = v.duration_seconds {
                if !c.durations_seconds.contains(&d) {
                    issues.push("request.durationSeconds", one_of(c.durations_seconds));
                }
            }
            if let Some(r) = v.resolution {
                if !c.resolutions.contains(&r) {
                    issues.push("request.resolution", one_of(c.resolutions));
                }
            }
            check_aspect(c, v.aspect_ratio, issues);
            check_samples(c, v.sample_count, issues);
            if v.generate_audio == Some(true) && !c.generates_audio {
                issues.push("request.generateAudio", format!("{} cannot generate audio", c.model_id));
            }
            if let Some(image) = &v.image {
                if !c.accepts_image_input {
                    issues.push("request.image", format!("{} does not accept a starting image", c.model_id));
                } else {
                    check_ref_kind("request.image", image, MediaKind::Image, issues);
                }
            }
        }
        GenerationRequest::Image(i) => {
            check_aspect(c, i.aspect_ratio, issues);
            check_samples(c, i.sample_count, issues);
        }
        GenerationRequest::Audio(a) => match c.audio_mode {
            Some(AudioMode::Speech) => {
                if a.text.is_none() {
                    issues.push("request.text", "required for speech synthesis");
                }
                if a.prompt.is_some() {
                    issues.push("request.prompt", "not used for speech synthesis, put the words in `text`");
                }
                match a.voice.as_deref() {
                    None => issues.push("request.voice", one_of(c.voices)),
                    Some(voice) if !c.voices.contains(&voice) => {
                        issues.push("request.voice", one_of(c.voices))
                    }
                    Some(_) => {}
                }
            }
            Some(AudioMode::Music) => {
                if a.prompt.is_none() {
                    issues.push("request.prompt", "required for music generation");
                }
                if a.text.is_some() || a.voice.is_some() {
                    issues.push("request.text", "music generation takes a `prompt`, not text or voice");
                }
            }
            None => issues.push("request.type", format!("{} does not produce audio", c.model_id)),
        },
        GenerationRequest::Text(t) => {
            if !t.attachments.is_empty() && !c.accepts_attachments {
                issues.push("request.attachments", format!("{} does not accept attachments", c.model_id));
            }
        }
    }
}

fn check_aspect(c: &ModelConstraints, aspect: Option<AspectRatio>, issues: &mut Issues) {
    if let Some(a) = aspect {
        if !c.aspect_ratios.contains(&a) {
            issues.push("request.aspectRatio", one_of(c.aspect_ratios));
        }
    }
}

fn check_samples(c: &ModelConstraints, samples: Option<u32>, issues: &mut Issues) {
    if let Some(n) = samples {
        if n > c.max_samples {
            issues.push("request.sampleCount", format!("at most {}", c.max_samples));
        }
    }
}

fn check_ref_kind(path: &str, media: &MediaRef, expected: MediaKind, issues: &mut Issues) {
    if let Some(mime) = &media.mime_type {
        if kind_for_mime(mime) != expected {
            issues.push(format!("{path}.mimeType"), format!("`{mime}` is not {expected}"));
        }
    }
}

/// JSON description of the request shape a model accepts.
///
/// Handed to the language model during the structured-generation pass.
pub fn schema_hint(model_id: &str) -> Option<Value> {
    let c = constraints_for(model_id)?;
    let list = |items: &[String]| Value::from(items.to_vec());
    let aspects: Vec<String> = c.aspect_ratios.iter().map(ToString::to_string).collect();

    let fields = match c.kind {
        MediaKind::Video => {
            let mut f = json!({
                "prompt": "string, required, scene description",
                "durationSeconds": c.durations_seconds,
                "resolution": list(&c.resolutions.iter().map(ToString::to_string).collect::<Vec<_>>()),
                "aspectRatio": list(&aspects),
                "negativePrompt": "string, optional, things to avoid",
                "sampleCount": format!("integer 1-{}", c.max_samples),
            });
            if c.generates_audio {
                f["generateAudio"] = json!("boolean, optional");
            }
            if c.accepts_image_input {
                f["image"] = json!("optional starting frame: an image placeholder token");
            }
            f
        }
        MediaKind::Image => json!({
            "prompt": "string, required",
            "aspectRatio": list(&aspects),
            "sampleCount": format!("integer 1-{}", c.max_samples),
            "negativePrompt": "string, optional",
        }),
        MediaKind::Audio => match c.audio_mode {
            Some(AudioMode::Speech) => json!({
                "text": "string, required, the exact words to speak",
                "voice": c.voices,
                "languageCode": "BCP-47 code, optional, default en-US",
            }),
            _ => json!({
                "prompt": "string, required, description of the music",
                "negativePrompt": "string, optional",
            }),
        },
        MediaKind::Text => json!({
            "prompt": "string, required",
            "systemInstruction": "string, optional",
            "maxOutputTokens": "integer 1-8192, optional",
            "attachments": "optional list of placeholder tokens for files to read",
        }),
        MediaKind::File => json!({}),
    };

    Some(json!({ "type": c.kind.to_string(), "fields": fields }))
}
