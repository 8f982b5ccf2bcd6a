use std::env;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

/// Environment keys searched, in order, for the service credential.
pub const CREDENTIAL_ENV_KEYS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Unknown,
    Present,
    Absent,
}

impl CredentialState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}

/// Host capability answering "is a usable credential selected right now".
pub trait CredentialProbe: Send + Sync {
    fn probe(&self) -> anyhow::Result<bool>;
}

/// Shared slot holding the active key. The remote client reads it on every
/// call, so a key selected mid-session applies to the next request.
#[derive(Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("present", &self.get().is_some())
            .finish()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(key);
        store
    }

    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn set(&self, key: impl Into<String>) {
        let key = key.into().trim().to_string();
        if let Ok(mut slot) = self.inner.write() {
            *slot = if key.is_empty() { None } else { Some(key) };
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }
}

impl CredentialProbe for CredentialStore {
    fn probe(&self) -> anyhow::Result<bool> {
        Ok(self.get().is_some())
    }
}

/// Looks for a pre-provisioned key in the environment and loads it into the
/// shared store.
#[derive(Debug, Clone)]
pub struct EnvCredentialProbe {
    store: CredentialStore,
    keys: Vec<String>,
}

impl EnvCredentialProbe {
    pub fn new(store: CredentialStore) -> Self {
        Self::with_keys(store, CREDENTIAL_ENV_KEYS)
    }

    pub fn with_keys(store: CredentialStore, keys: &[&str]) -> Self {
        Self {
            store,
            keys: keys.iter().map(|key| (*key).to_string()).collect(),
        }
    }
}

impl CredentialProbe for EnvCredentialProbe {
    fn probe(&self) -> anyhow::Result<bool> {
        if self.store.get().is_some() {
            return Ok(true);
        }
        let found = self.keys.iter().find_map(|key| non_empty_env(key));
        match found {
            Some(value) => {
                self.store.set(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Decides whether generation calls may reach the network.
pub struct CredentialGate {
    state: CredentialState,
    probe: Box<dyn CredentialProbe>,
}

impl fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialGate")
            .field("state", &self.state)
            .finish()
    }
}

impl CredentialGate {
    pub fn new(probe: impl CredentialProbe + 'static) -> Self {
        Self {
            state: CredentialState::Unknown,
            probe: Box::new(probe),
        }
    }

    /// Re-probes every time it is called. A probe error counts as absent.
    pub fn check(&mut self) -> CredentialState {
        self.state = match self.probe.probe() {
            Ok(true) => CredentialState::Present,
            Ok(false) | Err(_) => CredentialState::Absent,
        };
        self.state
    }

    pub fn invalidate(&mut self) {
        self.state = CredentialState::Absent;
    }

    /// Optimistic: the selection is not re-verified.
    pub fn mark_present(&mut self) {
        self.state = CredentialState::Present;
    }

    pub fn is_open(&self) -> bool {
        self.state == CredentialState::Present
    }

    pub fn state(&self) -> CredentialState {
        self.state
    }
}
