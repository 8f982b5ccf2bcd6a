use serde::Serialize;
use thiserror::Error;

/// Message fragments the generation service uses when the key is bad or the
/// key's project cannot see the model. Only consulted when the failure did
/// not already arrive with a structured kind.
pub const CREDENTIAL_MARKERS: &[&str] = &["API key not valid", "Requested entity was not found"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Credential,
    InvalidInput,
    Transport,
    Remote,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::InvalidInput => "invalid_input",
            Self::Transport => "transport",
            Self::Remote => "remote",
        }
    }
}

/// Error surfaced by a remote generation client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
}

impl RemoteFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Remote, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Credential, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Structured kind first, message markers as the fallback.
pub fn classify_failure(failure: &RemoteFailure) -> FailureKind {
    match failure.kind {
        FailureKind::Credential | FailureKind::InvalidInput => failure.kind,
        FailureKind::Transport | FailureKind::Remote => {
            if message_names_credential(&failure.message) {
                FailureKind::Credential
            } else {
                failure.kind
            }
        }
    }
}

pub fn message_names_credential(message: &str) -> bool {
    CREDENTIAL_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("the generation service rejected the credential: {0}")]
    Credential(String),
    #[error("generation failed: {message}")]
    Remote {
        message: String,
        status: Option<u16>,
    },
    #[error("invalid image data: {0}")]
    InvalidInput(String),
    #[error("history index {index} is out of range (history has {len} entries)")]
    OutOfRange { index: usize, len: usize },
    #[error("history is empty; load an image first")]
    EmptyHistory,
    #[error("an {0} is already in progress")]
    AlreadyBusy(&'static str),
    #[error("no usable credential is selected")]
    GateClosed,
    #[error("no image is loaded")]
    NoImage,
    #[error("animation did not finish after {attempts} polls ({elapsed_s}s)")]
    Timeout { attempts: u32, elapsed_s: u64 },
    #[error("animation was abandoned")]
    Abandoned,
}

impl SessionError {
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::Credential(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential",
            Self::Remote { .. } => "remote",
            Self::InvalidInput(_) => "invalid_input",
            Self::OutOfRange { .. } => "out_of_range",
            Self::EmptyHistory => "empty_history",
            Self::AlreadyBusy(_) => "already_busy",
            Self::GateClosed => "gate_closed",
            Self::NoImage => "no_image",
            Self::Timeout { .. } => "timeout",
            Self::Abandoned => "abandoned",
        }
    }
}

impl From<RemoteFailure> for SessionError {
    fn from(failure: RemoteFailure) -> Self {
        match classify_failure(&failure) {
            FailureKind::Credential => Self::Credential(failure.message),
            FailureKind::InvalidInput => Self::InvalidInput(failure.message),
            FailureKind::Transport | FailureKind::Remote => Self::Remote {
                message: failure.message,
                status: failure.status,
            },
        }
    }
}
