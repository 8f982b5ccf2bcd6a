pub mod animation;
pub mod client;
pub mod config;
pub mod controller;
pub mod dryrun;
pub mod gemini;
pub mod orchestrator;
pub mod ticker;

use std::sync::Arc;

use anyhow::{bail, Result};
use retouch_contracts::credentials::CredentialStore;
use retouch_contracts::events::EventPayload;
use retouch_contracts::models::ModelSpec;
use serde_json::Value;
use uuid::Uuid;

pub use animation::{AnimationSession, AnimationState, GenerationJob, JobStatus};
pub use client::{GenerationClient, JobHandle, PollStatus, VideoArtifact};
pub use config::EngineConfig;
pub use controller::{Mode, SessionController, SessionSnapshot};
pub use dryrun::DryrunClient;
pub use gemini::GeminiClient;
pub use orchestrator::{EditOrchestrator, EditState};
pub use ticker::{ProgressTicker, ThreadTicker, TickerLease};

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Client serving both models. Dry-run and remote models cannot be mixed
/// in one session, and the video model must run as a long-running job.
pub fn build_client(
    edit_model: &ModelSpec,
    video_model: &ModelSpec,
    credentials: CredentialStore,
    config: &EngineConfig,
) -> Result<Arc<dyn GenerationClient>> {
    if !video_model.long_running {
        bail!(
            "video model {} does not run as a long-running job",
            video_model.name
        );
    }
    match (edit_model.is_dryrun(), video_model.is_dryrun()) {
        (true, true) => Ok(Arc::new(DryrunClient::default())),
        (false, false) => Ok(Arc::new(GeminiClient::new(
            credentials,
            edit_model.name.clone(),
            video_model.name.clone(),
            config,
        ))),
        _ => bail!(
            "cannot mix dry-run and remote models (edit: {}, video: {})",
            edit_model.name,
            video_model.name
        ),
    }
}

pub(crate) fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use retouch_contracts::models::{ModelSelector, CAPABILITY_IMAGE_EDIT, CAPABILITY_VIDEO};

    use super::*;

    fn pick(requested: &str, capability: &str) -> anyhow::Result<ModelSpec> {
        ModelSelector::new(None)
            .select(Some(requested), capability, false)
            .map(|selection| selection.model)
            .map_err(anyhow::Error::msg)
    }

    #[test]
    fn build_client_routes_by_provider() -> anyhow::Result<()> {
        let store = CredentialStore::new();
        let config = EngineConfig::default();

        let remote = build_client(
            &pick("gemini-2.5-flash-image", CAPABILITY_IMAGE_EDIT)?,
            &pick("veo-3.1-fast-generate-preview", CAPABILITY_VIDEO)?,
            store.clone(),
            &config,
        )?;
        assert_eq!(remote.name(), "gemini");

        let offline = build_client(
            &pick("dryrun-edit-1", CAPABILITY_IMAGE_EDIT)?,
            &pick("dryrun-video-1", CAPABILITY_VIDEO)?,
            store.clone(),
            &config,
        )?;
        assert_eq!(offline.name(), "dryrun");

        let mixed = build_client(
            &pick("dryrun-edit-1", CAPABILITY_IMAGE_EDIT)?,
            &pick("veo-3.1-fast-generate-preview", CAPABILITY_VIDEO)?,
            store,
            &config,
        );
        assert!(mixed.is_err());
        Ok(())
    }

    #[test]
    fn build_client_requires_long_running_video_model() -> anyhow::Result<()> {
        let mut video = pick("veo-3.1-generate-preview", CAPABILITY_VIDEO)?;
        video.long_running = false;
        let err = build_client(
            &pick("gemini-2.5-flash-image", CAPABILITY_IMAGE_EDIT)?,
            &video,
            CredentialStore::new(),
            &EngineConfig::default(),
        )
        .err()
        .ok_or_else(|| anyhow::anyhow!("short-running video model was accepted"))?;
        assert!(err.to_string().contains("veo-3.1-generate-preview"));
        Ok(())
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
