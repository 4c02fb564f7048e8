use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::media::MediaKind;

/// Structured generation request, discriminated by media type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationRequest {
    Video(VideoRequest),
    Image(ImageRequest),
    Audio(AudioRequest),
    Text(TextRequest),
}

impl GenerationRequest {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video(_) => MediaKind::Video,
            Self::Image(_) => MediaKind::Image,
            Self::Audio(_) => MediaKind::Audio,
            Self::Text(_) => MediaKind::Text,
        }
    }
}

/// A resource in object storage, always in canonical `gs://` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MediaRef {
    #[garde(custom(canonical_uri))]
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub mime_type: Option<String>,
}

fn canonical_uri(value: &str, _ctx: &()) -> garde::Result {
    match value.strip_prefix("gs://").and_then(|rest| rest.split_once('/')) {
        Some((bucket, path)) if !bucket.is_empty() && !path.is_empty() => Ok(()),
        _ => Err(garde::Error::new("must be a gs://bucket/path storage URI")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    #[strum(serialize = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    #[strum(serialize = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    #[strum(serialize = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    #[strum(serialize = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    #[strum(serialize = "3:4")]
    StandardPortrait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Resolution {
    #[serde(rename = "720p")]
    #[strum(serialize = "720p")]
    Hd,
    #[serde(rename = "1080p")]
    #[strum(serialize = "1080p")]
    FullHd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VideoRequest {
    #[garde(length(min = 1, max = 4000))]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 60))]
    pub duration_seconds: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub aspect_ratio: Option<AspectRatio>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub resolution: Option<Resolution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(max = 2000))]
    pub negative_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub generate_audio: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 4))]
    pub sample_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub seed: Option<u32>,

    /// Starting frame for image-to-video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(dive)]
    pub image: Option<MediaRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageRequest {
    #[garde(length(min = 1, max = 4000))]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub aspect_ratio: Option<AspectRatio>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 4))]
    pub sample_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(max = 2000))]
    pub negative_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub seed: Option<u32>,
}

/// Speech synthesis (`text` + `voice`) or music generation (`prompt`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AudioRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 4000))]
    pub prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 5000))]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub voice: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 2, max = 16))]
    pub language_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(max = 2000))]
    pub negative_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub seed: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TextRequest {
    #[garde(length(min = 1, max = 30000))]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(max = 8000))]
    pub system_instruction: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 8192))]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(length(max = 10), dive)]
    pub attachments: Vec<MediaRef>,
}
