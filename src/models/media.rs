use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Broad media type of a request, a reference or an output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
    Text,
    /// A reference whose type could not be inferred.
    File,
}

const EXTENSIONS: &[(&str, &str, MediaKind)] = &[
    ("mp4", "video/mp4", MediaKind::Video),
    ("mov", "video/quicktime", MediaKind::Video),
    ("webm", "video/webm", MediaKind::Video),
    ("png", "image/png", MediaKind::Image),
    ("jpg", "image/jpeg", MediaKind::Image),
    ("jpeg", "image/jpeg", MediaKind::Image),
    ("webp", "image/webp", MediaKind::Image),
    ("gif", "image/gif", MediaKind::Image),
    ("mp3", "audio/mpeg", MediaKind::Audio),
    ("wav", "audio/wav", MediaKind::Audio),
    ("ogg", "audio/ogg", MediaKind::Audio),
    ("flac", "audio/flac", MediaKind::Audio),
    ("m4a", "audio/mp4", MediaKind::Audio),
    ("txt", "text/plain", MediaKind::Text),
    ("pdf", "application/pdf", MediaKind::File),
];

/// Lowercased extension of the last path segment, ignoring query strings.
pub fn extension_of(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Mime type for a path, inferred from its extension.
pub fn mime_for_path(path: &str) -> Option<&'static str> {
    let ext = extension_of(path)?;
    EXTENSIONS
        .iter()
        .find(|(e, _, _)| *e == ext)
        .map(|(_, mime, _)| *mime)
}

/// Media kind for a path; unknown extensions are `File`.
pub fn kind_for_path(path: &str) -> MediaKind {
    extension_of(path)
        .and_then(|ext| EXTENSIONS.iter().find(|(e, _, _)| *e == ext))
        .map(|(_, _, kind)| *kind)
        .unwrap_or(MediaKind::File)
}

pub fn kind_for_mime(mime: &str) -> MediaKind {
    match mime.split('/').next() {
        Some("video") => MediaKind::Video,
        Some("image") => MediaKind::Image,
        Some("audio") => MediaKind::Audio,
        Some("text") => MediaKind::Text,
        _ => MediaKind::File,
    }
}

/// File extension used when naming an output of the given mime type.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    match mime {
        "audio/wav" | "audio/x-wav" | "audio/wave" => return Some("wav"),
        "audio/mp3" => return Some("mp3"),
        _ => {}
    }
    EXTENSIONS
        .iter()
        .find(|(_, m, _)| *m == mime)
        .map(|(ext, _, _)| *ext)
}
