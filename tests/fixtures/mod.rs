//! Request bodies shared by the lifecycle and end-to-end tests.

#![allow(dead_code)]

use serde_json::{json, Value};

pub const VIDEO_MODEL: &str = "veo-3.0-generate-001";
pub const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
pub const TEXT_MODEL: &str = "gemini-2.5-flash";
pub const MUSIC_MODEL: &str = "lyria-002";
pub const DRAFT_IMAGE_MODEL: &str = "imagen-4.0-fast-generate-001";
pub const SPEECH_MODEL: &str = "chirp-3-hd";
pub const SILENT_VIDEO_MODEL: &str = "veo-2.0-generate-001";

pub fn video_request() -> Value {
    json!({
        "type": "video",
        "prompt": "a slow dolly shot across a rain-soaked neon street",
        "durationSeconds": 8,
        "resolution": "1080p",
        "aspectRatio": "16:9",
    })
}

/// Video request with a duration the model does not offer.
pub fn video_request_bad_duration() -> Value {
    json!({
        "type": "video",
        "prompt": "a paper boat drifting down a gutter",
        "durationSeconds": 30,
    })
}

pub fn image_request() -> Value {
    json!({
        "type": "image",
        "prompt": "a lighthouse at dusk, watercolor",
        "aspectRatio": "1:1",
    })
}

/// Video request within the 720p, 5-8 second range of the silent model.
pub fn silent_video_request() -> Value {
    json!({
        "type": "video",
        "prompt": "fog rolling over a pine ridge at dawn",
        "durationSeconds": 6,
        "resolution": "720p",
    })
}

pub fn speech_request() -> Value {
    json!({
        "type": "audio",
        "text": "Welcome aboard. Please keep your seatbelt fastened.",
        "voice": "Kore",
    })
}

pub fn text_request() -> Value {
    json!({
        "type": "text",
        "prompt": "Write a two sentence bedtime story about a fox.",
    })
}

pub fn music_request() -> Value {
    json!({
        "type": "audio",
        "prompt": "calm lo-fi piano loop",
    })
}

/// Analyzer replies that turn a free-text prompt into a 4 second video.
pub fn four_second_video_replies() -> [&'static str; 2] {
    [
        r#"{"modelId": "veo-3.0-generate-001", "type": "video", "parameters": {"durationSeconds": 4}, "reason": "The prompt asks for a short clip of moving water."}"#,
        r#"{"request": {"prompt": "sunset over gentle waves", "durationSeconds": 4}, "reason": "Duration taken from the prompt."}"#,
    ]
}
