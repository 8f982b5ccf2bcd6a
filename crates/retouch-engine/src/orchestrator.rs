use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use retouch_contracts::credentials::CredentialGate;
use retouch_contracts::errors::SessionError;
use retouch_contracts::events::EventWriter;
use retouch_contracts::history::{EditHistory, ImageState};
use serde_json::json;

use crate::client::GenerationClient;
use crate::map_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Busy,
}

/// Shared in-flight marker. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag {
    inner: Arc<AtomicBool>,
}

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another holder already owns the flag.
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.inner
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard {
                flag: Arc::clone(&self.inner),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Clears the busy flag on every exit path.
#[derive(Debug)]
pub struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Request/response image edits against the current history entry.
pub struct EditOrchestrator {
    client: Arc<dyn GenerationClient>,
    busy: BusyFlag,
    events: EventWriter,
}

impl EditOrchestrator {
    pub fn new(client: Arc<dyn GenerationClient>, events: EventWriter) -> Self {
        Self {
            client,
            busy: BusyFlag::new(),
            events,
        }
    }

    pub fn state(&self) -> EditState {
        if self.busy.is_busy() {
            EditState::Busy
        } else {
            EditState::Idle
        }
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Runs one edit of the current entry and appends the result. Returns the
    /// new cursor. Nothing reaches the network while the gate is closed.
    pub fn submit_edit(
        &mut self,
        history: &mut EditHistory,
        gate: &mut CredentialGate,
        instruction: &str,
        label: &str,
    ) -> Result<usize, SessionError> {
        let Some(_busy) = self.busy.try_acquire() else {
            return Err(SessionError::AlreadyBusy("edit"));
        };
        let source = history.current()?.image.clone();
        if !gate.is_open() {
            return Err(SessionError::GateClosed);
        }
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(SessionError::InvalidInput(
                "edit instruction is empty".to_string(),
            ));
        }

        self.events.record(
            "edit_started",
            map_object(json!({
                "label": label,
                "instruction": instruction,
                "client": self.client.name(),
                "source_index": history.cursor(),
            })),
        );

        match self
            .client
            .edit(&source.payload, &source.media_type, instruction)
        {
            Ok(payload) => {
                let image = ImageState::new(payload, source.media_type.clone());
                let cursor = history.append(image, label)?;
                self.events.record(
                    "edit_succeeded",
                    map_object(json!({
                        "label": label,
                        "cursor": cursor,
                        "history_len": history.len(),
                    })),
                );
                Ok(cursor)
            }
            Err(failure) => {
                let kind = failure.kind;
                let err = SessionError::from(failure);
                self.events.record(
                    "edit_failed",
                    map_object(json!({
                        "label": label,
                        "code": err.code(),
                        "kind": kind.as_str(),
                        "error": err.to_string(),
                    })),
                );
                if err.is_credential() {
                    gate.invalidate();
                    self.events.record(
                        "credential_invalidated",
                        map_object(json!({ "source": "edit" })),
                    );
                }
                Err(err)
            }
        }
    }
}
