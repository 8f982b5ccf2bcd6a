use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use retouch_contracts::errors::RemoteFailure;

pub type ClientResult<T> = Result<T, RemoteFailure>;

pub const VIDEO_MEDIA_TYPE: &str = "video/mp4";

/// Opaque reference to a remote long-running animation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub done: bool,
    pub artifact_uri: Option<String>,
}

impl PollStatus {
    pub fn pending() -> Self {
        Self {
            done: false,
            artifact_uri: None,
        }
    }

    pub fn finished(uri: impl Into<String>) -> Self {
        Self {
            done: true,
            artifact_uri: Some(uri.into()),
        }
    }
}

/// Fetched animation output. Never stored in the edit history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub uri: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// The remote model behind every transformation. Implementations return
/// exactly one result or a failure, never partial output.
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, payload: &str, media_type: &str, instruction: &str) -> ClientResult<String>;
    fn animate_submit(
        &self,
        payload: &str,
        media_type: &str,
        instruction: &str,
    ) -> ClientResult<JobHandle>;
    fn animate_poll(&self, job: &JobHandle) -> ClientResult<PollStatus>;
    fn fetch_artifact(&self, uri: &str) -> ClientResult<Vec<u8>>;
}

/// Bare base64 body of `payload`, accepting data URLs. Rejects anything that
/// does not decode before a request is built.
pub fn source_base64(payload: &str) -> ClientResult<String> {
    let trimmed = payload.trim();
    let body = if trimmed.starts_with("data:") {
        trimmed
            .split_once(',')
            .map(|(_, data)| data)
            .unwrap_or_default()
    } else {
        trimmed
    };
    if body.is_empty() {
        return Err(RemoteFailure::invalid_input(
            "Invalid base64 image data URL",
        ));
    }
    BASE64
        .decode(body.as_bytes())
        .map_err(|err| RemoteFailure::invalid_input(format!("image payload is not base64: {err}")))?;
    Ok(body.to_string())
}

pub(crate) fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// Extension hint first, then magic bytes.
pub fn detect_media_type(path: Option<&Path>, bytes: &[u8]) -> Option<&'static str> {
    if let Some(mime) = path.and_then(mime_for_path) {
        return Some(mime);
    }
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
