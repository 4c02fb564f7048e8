//! Detection and tagging of storage references embedded in free text.
//!
//! Before a prompt reaches the language model, every storage reference in it
//! (`gs://` URIs and signed or public storage HTTP URLs) is canonicalized to
//! `gs://bucket/path`, deduplicated, and replaced with a placeholder such as
//! `<<ref_0_image>>`. After inference, placeholders in the model's JSON are
//! resolved back to `{uri, mimeType}` references.

use regex::Regex;
use reqwest::Url;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::models::media::{kind_for_path, mime_for_path, MediaKind};

/// A storage reference found in free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedReference {
    pub index: usize,
    /// Canonical `gs://bucket/path` form.
    pub uri: String,
    pub kind: MediaKind,
    pub mime_type: Option<&'static str>,
}

impl TaggedReference {
    pub fn placeholder(&self) -> String {
        format!("<<ref_{}_{}>>", self.index, self.kind)
    }

    fn media_ref(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("uri".to_string(), Value::String(self.uri.clone()));
        if let Some(mime) = self.mime_type {
            obj.insert("mimeType".to_string(), Value::String(mime.to_string()));
        }
        Value::Object(obj)
    }
}

/// Result of tagging a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedText {
    pub text: String,
    pub references: Vec<TaggedReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("placeholder {0} does not match any reference in the prompt")]
    UnknownPlaceholder(String),
}

fn reference_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:gs://|https?://)[^\s"'<>()\[\]{}]+"#).expect("reference pattern is valid")
    })
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<<ref_(\d+)_(video|image|audio|text|file)>>").expect("placeholder pattern is valid")
    })
}

/// Canonical `gs://bucket/path` for a storage reference, or `None` for other URLs.
///
/// Accepted forms:
/// - `gs://bucket/path`
/// - `https://storage.googleapis.com/bucket/path[?signature]`
/// - `https://storage.cloud.google.com/bucket/path`
/// - `https://bucket.storage.googleapis.com/path[?signature]`
/// - `https://firebasestorage.googleapis.com/v0/b/bucket/o/<encoded path>?alt=media&token=...`
pub fn canonicalize(reference: &str) -> Option<String> {
    if let Some(rest) = reference.strip_prefix("gs://") {
        let (bucket, path) = rest.split_once('/')?;
        if bucket.is_empty() || path.is_empty() {
            return None;
        }
        return Some(format!("gs://{bucket}/{path}"));
    }

    let url = Url::parse(reference).ok()?;
    let host = url.host_str()?;
    let raw_path = url.path().trim_start_matches('/');

    let (bucket, encoded) = match host {
        "storage.googleapis.com" | "storage.cloud.google.com" => raw_path.split_once('/')?,
        "firebasestorage.googleapis.com" => {
            let rest = raw_path.strip_prefix("v0/b/")?;
            let (bucket, object) = rest.split_once("/o/")?;
            (bucket, object)
        }
        _ => {
            let bucket = host.strip_suffix(".storage.googleapis.com")?;
            (bucket, raw_path)
        }
    };

    let path = urlencoding::decode(encoded).ok()?;
    if bucket.is_empty() || path.is_empty() {
        return None;
    }
    Some(format!("gs://{bucket}/{path}"))
}

/// Replace every storage reference in `text` with a typed placeholder.
///
/// Identical references (after canonicalization) share one placeholder.
/// Non-storage URLs are left as they are.
pub fn tag_references(text: &str) -> TaggedText {
    let mut references: Vec<TaggedReference> = Vec::new();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for m in reference_pattern().find_iter(text) {
        let raw = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        let Some(uri) = canonicalize(raw) else {
            continue;
        };

        let existing = references.iter().find(|r| r.uri == uri);
        let reference = match existing {
            Some(r) => r.clone(),
            None => {
                let r = TaggedReference {
                    index: references.len(),
                    kind: kind_for_path(&uri),
                    mime_type: mime_for_path(&uri),
                    uri,
                };
                references.push(r.clone());
                r
            }
        };

        out.push_str(&text[last..m.start()]);
        out.push_str(&reference.placeholder());
        last = m.start() + raw.len();
    }
    out.push_str(&text[last..]);

    TaggedText {
        text: out,
        references,
    }
}

/// Resolve placeholders in a JSON value produced by the language model.
///
/// - a string that is exactly a placeholder becomes `{uri, mimeType}`
/// - an object whose `uri` is a placeholder gets the URI and, when missing,
///   the inferred `mimeType`
/// - placeholders inside longer strings are replaced by the bare URI
pub fn resolve_placeholders(value: &Value, references: &[TaggedReference]) -> Result<Value, ResolveError> {
    match value {
        Value::String(s) => {
            if let Some(r) = exact_placeholder(s, references)? {
                return Ok(r.media_ref());
            }
            Ok(Value::String(replace_inline(s, references)?))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_placeholders(v, references))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(obj) => {
            let uri_ref = match obj.get("uri").and_then(Value::as_str) {
                Some(s) => exact_placeholder(s, references)?,
                None => None,
            };
            let mut out = Map::new();
            for (key, v) in obj {
                let resolved = match (key.as_str(), uri_ref) {
                    ("uri", Some(r)) => Value::String(r.uri.clone()),
                    _ => resolve_placeholders(v, references)?,
                };
                out.insert(key.clone(), resolved);
            }
            if let Some(mime) = uri_ref.and_then(|r| r.mime_type) {
                out.entry("mimeType").or_insert_with(|| json!(mime));
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn lookup<'a>(index: &str, references: &'a [TaggedReference], token: &str) -> Result<&'a TaggedReference, ResolveError> {
    index
        .parse::<usize>()
        .ok()
        .and_then(|i| references.get(i))
        .ok_or_else(|| ResolveError::UnknownPlaceholder(token.to_string()))
}

fn exact_placeholder<'a>(
    s: &str,
    references: &'a [TaggedReference],
) -> Result<Option<&'a TaggedReference>, ResolveError> {
    let trimmed = s.trim();
    match placeholder_pattern().captures(trimmed) {
        Some(caps) if caps.get(0).map(|m| m.as_str()) == Some(trimmed) => {
            lookup(&caps[1], references, trimmed).map(Some)
        }
        _ => Ok(None),
    }
}

fn replace_inline(s: &str, references: &[TaggedReference]) -> Result<String, ResolveError> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in placeholder_pattern().captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        let r = lookup(&caps[1], references, whole.as_str())?;
        out.push_str(&s[last..whole.start()]);
        out.push_str(&r.uri);
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(out)
}
