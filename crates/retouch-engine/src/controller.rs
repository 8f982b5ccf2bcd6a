use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use retouch_contracts::credentials::{
    CredentialGate, CredentialState, CredentialStore, EnvCredentialProbe,
};
use retouch_contracts::errors::SessionError;
use retouch_contracts::events::EventWriter;
use retouch_contracts::history::{EditHistory, HistoryEntry, ImageState, ORIGINAL_LABEL};
use retouch_contracts::presets::{find_preset, EditRequest};
use serde_json::{json, Value};

use crate::animation::{AnimationSession, AnimationState};
use crate::client::{detect_media_type, GenerationClient, VideoArtifact};
use crate::config::EngineConfig;
use crate::map_object;
use crate::orchestrator::{EditOrchestrator, EditState};
use crate::ticker::{ProgressTicker, ThreadTicker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Photo,
    Video,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "photo" | "edit" => Some(Self::Photo),
            "video" | "animate" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Read-only view of the session for a front end.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub labels: Vec<String>,
    pub cursor: usize,
    pub current: Option<ImageState>,
    pub original: Option<ImageState>,
    pub mode: Mode,
    pub edit_state: EditState,
    pub animation: &'static str,
    pub poll_attempt: Option<u32>,
    pub progress: Option<String>,
    pub has_video: bool,
    pub last_error: Option<String>,
    pub credential: CredentialState,
    pub needs_credential: bool,
}

impl SessionSnapshot {
    /// Image payloads are summarized, not inlined.
    pub fn to_json(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "history": self.labels,
            "cursor": self.cursor,
            "current_media_type": self.current.as_ref().map(|image| image.media_type.clone()),
            "has_original": self.original.is_some(),
            "mode": self.mode.as_str(),
            "edit_state": match self.edit_state {
                EditState::Idle => "idle",
                EditState::Busy => "busy",
            },
            "animation": self.animation,
            "poll_attempt": self.poll_attempt,
            "progress": self.progress,
            "has_video": self.has_video,
            "last_error": self.last_error,
            "credential": self.credential.as_str(),
            "needs_credential": self.needs_credential,
        })
    }
}

/// Owns all per-session state: gate, history, the original upload, both
/// generation machines, the current mode and the last surfaced error.
pub struct SessionController {
    events: EventWriter,
    credentials: CredentialStore,
    gate: CredentialGate,
    history: EditHistory,
    original: Option<ImageState>,
    orchestrator: EditOrchestrator,
    animation: AnimationSession,
    mode: Mode,
    last_error: Option<SessionError>,
}

impl SessionController {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        credentials: CredentialStore,
        gate: CredentialGate,
        ticker: Arc<dyn ProgressTicker>,
        config: EngineConfig,
        events: EventWriter,
    ) -> Self {
        events.record(
            "session_started",
            map_object(json!({
                "client": client.name(),
                "api_base": config.api_base,
            })),
        );
        Self {
            orchestrator: EditOrchestrator::new(Arc::clone(&client), events.clone()),
            animation: AnimationSession::new(client, ticker, config, events.clone()),
            events,
            credentials,
            gate,
            history: EditHistory::new(),
            original: None,
            mode: Mode::Photo,
            last_error: None,
        }
    }

    /// Environment-probed gate and a threaded ticker.
    pub fn with_env_credentials(
        client: Arc<dyn GenerationClient>,
        credentials: CredentialStore,
        config: EngineConfig,
        events: EventWriter,
    ) -> Self {
        let gate = CredentialGate::new(EnvCredentialProbe::new(credentials.clone()));
        let ticker: Arc<dyn ProgressTicker> = Arc::new(ThreadTicker::new(events.clone()));
        Self::new(client, credentials, gate, ticker, config, events)
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Startup probe. Never leaves the gate `unknown`.
    pub fn start(&mut self) -> CredentialState {
        let state = self.gate.check();
        self.events.record(
            "credential_checked",
            map_object(json!({ "state": state.as_str() })),
        );
        state
    }

    /// Out-of-band key selection; the gate opens without re-verifying.
    pub fn select_credential(&mut self, key: &str) -> Result<(), SessionError> {
        if key.trim().is_empty() {
            return Err(SessionError::InvalidInput(
                "credential value is empty".to_string(),
            ));
        }
        self.credentials.set(key);
        self.gate.mark_present();
        if self
            .last_error
            .as_ref()
            .map(SessionError::is_credential)
            .unwrap_or(false)
        {
            self.last_error = None;
        }
        self.events.record(
            "credential_selected",
            map_object(json!({ "state": self.gate.state().as_str() })),
        );
        Ok(())
    }

    pub fn credential_state(&self) -> CredentialState {
        self.gate.state()
    }

    pub fn needs_credential(&self) -> bool {
        self.gate.state() == CredentialState::Absent
    }

    /// New upload: seeds history, back to photo mode, drops any video and
    /// abandons a running animation.
    pub fn load_image(&mut self, image: ImageState) -> Result<(), SessionError> {
        let decoded = image.decode()?;
        if decoded.is_empty() {
            return Err(SessionError::InvalidInput("image is empty".to_string()));
        }
        self.animation.abandon();
        self.history.seed(image.clone(), ORIGINAL_LABEL);
        self.events.record(
            "image_loaded",
            map_object(json!({
                "media_type": image.media_type,
                "bytes": decoded.len(),
            })),
        );
        self.original = Some(image);
        self.mode = Mode::Photo;
        self.last_error = None;
        Ok(())
    }

    pub fn load_image_bytes(
        &mut self,
        bytes: &[u8],
        path_hint: Option<&Path>,
    ) -> Result<(), SessionError> {
        if bytes.is_empty() {
            return Err(SessionError::InvalidInput("image is empty".to_string()));
        }
        let media_type = detect_media_type(path_hint, bytes).ok_or_else(|| {
            SessionError::InvalidInput("unrecognized image format".to_string())
        })?;
        self.load_image(ImageState::from_bytes(bytes, media_type))
    }

    pub fn load_image_path(&mut self, path: &Path) -> Result<()> {
        let bytes =
            fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        self.load_image_bytes(&bytes, Some(path))
            .with_context(|| format!("failed loading {}", path.display()))?;
        Ok(())
    }

    pub fn submit_edit(&mut self, instruction: &str, label: &str) -> Result<usize, SessionError> {
        let result =
            self.orchestrator
                .submit_edit(&mut self.history, &mut self.gate, instruction, label);
        self.track(result)
    }

    pub fn apply_request(&mut self, request: &EditRequest) -> Result<usize, SessionError> {
        self.submit_edit(&request.instruction, &request.label)
    }

    pub fn apply_preset(&mut self, id: &str) -> Result<usize, SessionError> {
        let preset = find_preset(id)
            .ok_or_else(|| SessionError::InvalidInput(format!("unknown preset: {}", id.trim())))?;
        self.apply_request(&preset.request())
    }

    pub fn revert(&mut self, index: usize) -> Result<&HistoryEntry, SessionError> {
        let entry = self.history.revert(index)?;
        self.events.record(
            "history_reverted",
            map_object(json!({ "cursor": index, "label": entry.label })),
        );
        Ok(entry)
    }

    /// Back to the original upload. No-op without one.
    pub fn reset(&mut self) {
        let Some(original) = self.original.clone() else {
            return;
        };
        self.animation.abandon();
        self.history.seed(original, ORIGINAL_LABEL);
        self.events
            .record("history_reset", map_object(json!({ "history_len": 1 })));
    }

    pub fn new_image(&mut self) {
        self.animation.abandon();
        self.original = None;
        self.history.clear();
        self.mode = Mode::Photo;
        self.last_error = None;
        self.events.record("session_cleared", map_object(json!({})));
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Refused while either machine is running. Leaving video mode drops
    /// the current artifact.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), SessionError> {
        if self.animation.is_active() {
            return Err(SessionError::AlreadyBusy("animation"));
        }
        if self.orchestrator.state() == EditState::Busy {
            return Err(SessionError::AlreadyBusy("edit"));
        }
        if mode == Mode::Photo {
            self.animation.discard_artifact();
        }
        if self.mode != mode {
            self.events.record(
                "mode_changed",
                map_object(json!({ "from": self.mode.as_str(), "to": mode.as_str() })),
            );
        }
        self.mode = mode;
        Ok(())
    }

    /// Animates the original upload, not the current edit.
    pub fn generate_animation(&mut self, instruction: &str) -> Result<u64, SessionError> {
        let Some(original) = self.original.clone() else {
            return self.track(Err(SessionError::NoImage));
        };
        self.last_error = None;
        let result = self
            .animation
            .generate_animation(&original, instruction, &self.gate);
        if result.is_ok() {
            self.mode = Mode::Video;
        }
        self.track(result)
    }

    /// Applies pending animation progress. Returns the outcome if the job
    /// finished during this call.
    pub fn pump(&mut self) -> Option<Result<(), SessionError>> {
        let outcome = self.animation.pump(&mut self.gate);
        if let Some(Err(err)) = &outcome {
            self.last_error = Some(err.clone());
        }
        outcome
    }

    /// `Ok(true)` once a video is ready, `Ok(false)` if nothing finished in
    /// time or no job is running.
    pub fn wait_animation(&mut self, timeout: Option<Duration>) -> Result<bool, SessionError> {
        let state = self.animation.wait(&mut self.gate, timeout).clone();
        match state {
            AnimationState::Ready(_) => Ok(true),
            AnimationState::Failed(err) => {
                self.last_error = Some(err.clone());
                Err(err)
            }
            AnimationState::Idle | AnimationState::Submitting | AnimationState::Polling { .. } => {
                Ok(false)
            }
        }
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn current_image(&self) -> Option<&ImageState> {
        self.history.current().ok().map(|entry| &entry.image)
    }

    pub fn original_image(&self) -> Option<&ImageState> {
        self.original.as_ref()
    }

    pub fn animation(&self) -> &AnimationSession {
        &self.animation
    }

    pub fn video(&self) -> Option<&VideoArtifact> {
        self.animation.artifact()
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let poll_attempt = match self.animation.state() {
            AnimationState::Polling { attempt } => Some(*attempt),
            _ => None,
        };
        SessionSnapshot {
            session_id: self.session_id().to_string(),
            labels: self.history.labels(),
            cursor: self.history.cursor(),
            current: self.current_image().cloned(),
            original: self.original.clone(),
            mode: self.mode,
            edit_state: self.orchestrator.state(),
            animation: self.animation.state().as_str(),
            poll_attempt,
            progress: self.animation.progress_message(),
            has_video: self.animation.artifact().is_some(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
            credential: self.gate.state(),
            needs_credential: self.needs_credential(),
        }
    }

    /// Writes the current image's bytes to `path`.
    pub fn export_current(&self, path: &Path) -> Result<usize> {
        let Some(image) = self.current_image() else {
            bail!("no image loaded");
        };
        let bytes = image.decode()?;
        write_bytes(path, &bytes)?;
        Ok(bytes.len())
    }

    pub fn export_video(&self, path: &Path) -> Result<usize> {
        let Some(video) = self.animation.artifact() else {
            bail!("no video is ready");
        };
        write_bytes(path, &video.bytes)?;
        Ok(video.bytes.len())
    }

    fn track<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(err) => self.last_error = Some(err.clone()),
        }
        result
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed writing {}", path.display()))
}
