use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use retouch_contracts::credentials::CredentialStore;
use retouch_contracts::errors::{FailureKind, RemoteFailure};
use serde_json::{json, Value};

use crate::client::{
    error_chain_text, source_base64, truncate_text, ClientResult, GenerationClient, JobHandle,
    PollStatus,
};
use crate::config::EngineConfig;

/// `ErrorInfo.reason` values the Generative Language API uses for bad keys.
const CREDENTIAL_REASONS: &[&str] = &[
    "API_KEY_INVALID",
    "API_KEY_EXPIRED",
    "API_KEY_SERVICE_BLOCKED",
];

/// REST client for Gemini image edits and Veo long-running video jobs.
pub struct GeminiClient {
    api_base: String,
    http: HttpClient,
    credentials: CredentialStore,
    edit_model: String,
    video_model: String,
    request_timeout: Duration,
    transport_retries: usize,
    retry_backoff: Duration,
}

impl GeminiClient {
    pub fn new(
        credentials: CredentialStore,
        edit_model: impl Into<String>,
        video_model: impl Into<String>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            credentials,
            edit_model: edit_model.into(),
            video_model: video_model.into(),
            request_timeout: config.request_timeout,
            transport_retries: config.transport_retries,
            retry_backoff: config.retry_backoff,
        }
    }

    fn api_key(&self) -> ClientResult<String> {
        self.credentials.get().ok_or_else(|| {
            RemoteFailure::credential("API key is not configured; select a key before generating")
        })
    }

    fn endpoint_for_model(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn operation_url(&self, job: &JobHandle) -> String {
        let name = job.as_str().trim();
        if name.starts_with("http://") || name.starts_with("https://") {
            return name.to_string();
        }
        format!("{}/{}", self.api_base, name.trim_start_matches('/'))
    }

    fn send_with_transport_retries(
        &self,
        label: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> ClientResult<HttpResponse> {
        for attempt in 0..=self.transport_retries {
            match build().timeout(self.request_timeout).send() {
                Ok(response) => return Ok(response),
                Err(raw) => {
                    let retryable = raw.is_timeout() || raw.is_connect() || raw.is_request();
                    if !retryable || attempt >= self.transport_retries {
                        let err = anyhow::Error::new(raw).context(format!("{label} request failed"));
                        return Err(RemoteFailure::transport(error_chain_text(&err, 1024)));
                    }
                    thread::sleep(self.retry_backoff * (attempt as u32 + 1));
                }
            }
        }
        Err(RemoteFailure::transport(format!(
            "{label} request failed after {} retries",
            self.transport_retries
        )))
    }

    fn post_json(&self, label: &str, endpoint: &str, payload: &Value) -> ClientResult<Value> {
        let api_key = self.api_key()?;
        let response = self.send_with_transport_retries(label, || {
            self.http
                .post(endpoint)
                .query(&[("key", api_key.as_str())])
                .json(payload)
        })?;
        response_json_or_failure(label, response)
    }
}

impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(&self, payload: &str, media_type: &str, instruction: &str) -> ClientResult<String> {
        let data = source_base64(payload)?;
        let endpoint = self.endpoint_for_model(&self.edit_model, "generateContent");
        let body = edit_payload(&data, media_type, instruction);
        let response = self.post_json("Gemini edit", &endpoint, &body)?;
        extract_inline_image(&response)
            .ok_or_else(|| RemoteFailure::remote("No image data found in Gemini API response."))
    }

    fn animate_submit(
        &self,
        payload: &str,
        media_type: &str,
        instruction: &str,
    ) -> ClientResult<JobHandle> {
        let data = source_base64(payload)?;
        let endpoint = self.endpoint_for_model(&self.video_model, "predictLongRunning");
        let body = animate_payload(&data, media_type, instruction);
        let response = self.post_json("Veo submit", &endpoint, &body)?;
        response
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| JobHandle(name.to_string()))
            .ok_or_else(|| RemoteFailure::remote("Veo submit response is missing an operation name"))
    }

    fn animate_poll(&self, job: &JobHandle) -> ClientResult<PollStatus> {
        let api_key = self.api_key()?;
        let url = self.operation_url(job);
        let response = self.send_with_transport_retries("Veo poll", || {
            self.http.get(&url).query(&[("key", api_key.as_str())])
        })?;
        let operation = response_json_or_failure("Veo poll", response)?;
        poll_status_from_operation(&operation)
    }

    fn fetch_artifact(&self, uri: &str) -> ClientResult<Vec<u8>> {
        let api_key = self.api_key()?;
        let response = self.send_with_transport_retries("Video download", || {
            self.http.get(uri).query(&[("key", api_key.as_str())])
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let reason = status.canonical_reason().unwrap_or("error");
            let mut failure = failure_from_error_body("Video download", status.as_u16(), &body);
            failure.message = format!(
                "Failed to download video ({} {reason}): {}",
                status.as_u16(),
                truncate_text(&body, 256)
            );
            return Err(failure);
        }
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| RemoteFailure::transport(format!("failed reading video bytes: {err}")))
    }
}

fn edit_payload(data: &str, media_type: &str, instruction: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "data": data, "mimeType": media_type } },
                { "text": instruction },
            ],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
        },
    })
}

fn animate_payload(data: &str, media_type: &str, instruction: &str) -> Value {
    json!({
        "instances": [{
            "prompt": instruction,
            "image": {
                "bytesBase64Encoded": data,
                "mimeType": media_type,
            },
        }],
        "parameters": {
            "aspectRatio": "16:9",
            "resolution": "720p",
            "sampleCount": 1,
        },
    })
}

fn response_json_or_failure(label: &str, response: HttpResponse) -> ClientResult<Value> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| RemoteFailure::transport(format!("{label} response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(failure_from_error_body(label, status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|err| {
        RemoteFailure::remote(format!("{label} returned invalid JSON payload: {err}"))
            .with_status(status.as_u16())
    })
}

/// Classifies a Google RPC error body. Structured fields decide the kind;
/// message markers are applied later by `classify_failure`.
fn failure_from_error_body(label: &str, code: u16, body: &str) -> RemoteFailure {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|value| value.get("error"));
    let message = error
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| truncate_text(body.trim(), 512));
    let kind = error
        .map(error_kind_from_rpc)
        .unwrap_or(FailureKind::Remote);
    let kind = if code == 401 { FailureKind::Credential } else { kind };
    RemoteFailure::new(kind, format!("{label} request failed ({code}): {message}")).with_status(code)
}

fn error_kind_from_rpc(error: &Value) -> FailureKind {
    let reasons_flag_credential = error
        .get("details")
        .and_then(Value::as_array)
        .map(|details| {
            details.iter().any(|detail| {
                detail
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(|reason| CREDENTIAL_REASONS.contains(&reason))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false);
    if reasons_flag_credential {
        return FailureKind::Credential;
    }
    match error.get("status").and_then(Value::as_str).unwrap_or_default() {
        "UNAUTHENTICATED" | "NOT_FOUND" => FailureKind::Credential,
        _ => FailureKind::Remote,
    }
}

fn extract_inline_image(response: &Value) -> Option<String> {
    let candidates = response.get("candidates").and_then(Value::as_array)?;
    let first = candidates.first()?;
    let parts = first
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)?;
    parts.iter().find_map(|part| {
        part.get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty())
            .map(str::to_string)
    })
}

fn poll_status_from_operation(operation: &Value) -> ClientResult<PollStatus> {
    if let Some(error) = operation.get("error").filter(|value| !value.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let code = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok());
        let failure = RemoteFailure::new(
            error_kind_from_rpc(error),
            format!("Video generation failed: {message}"),
        );
        return Err(match code {
            Some(code) => failure.with_status(code),
            None => failure,
        });
    }
    if !operation
        .get("done")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Ok(PollStatus::pending());
    }
    extract_video_uri(operation)
        .map(PollStatus::finished)
        .ok_or_else(|| RemoteFailure::remote("Video generation failed or returned no data."))
}

fn extract_video_uri(operation: &Value) -> Option<String> {
    let response = operation.get("response")?;
    let samples = response
        .get("generateVideoResponse")
        .and_then(|value| value.get("generatedSamples"))
        .or_else(|| response.get("generatedVideos"))
        .and_then(Value::as_array)?;
    samples
        .first()?
        .get("video")?
        .get("uri")?
        .as_str()
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string)
}
