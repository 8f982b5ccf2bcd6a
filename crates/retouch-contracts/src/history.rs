use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::errors::SessionError;

pub const ORIGINAL_LABEL: &str = "Original Image";

/// One fully realized image: base64 payload plus its media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageState {
    pub payload: String,
    pub media_type: String,
}

impl ImageState {
    pub fn new(payload: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            media_type: media_type.into(),
        }
    }

    pub fn from_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        Self::new(BASE64.encode(bytes), media_type)
    }

    /// Accepts `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Result<Self, SessionError> {
        let rest = url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| SessionError::InvalidInput("not a data URL".to_string()))?;
        let Some((header, payload)) = rest.split_once(',') else {
            return Err(SessionError::InvalidInput(
                "data URL has no payload".to_string(),
            ));
        };
        let media_type = header.strip_suffix(";base64").ok_or_else(|| {
            SessionError::InvalidInput("data URL is not base64 encoded".to_string())
        })?;
        if media_type.is_empty() || payload.is_empty() {
            return Err(SessionError::InvalidInput(
                "Invalid base64 image data URL".to_string(),
            ));
        }
        Ok(Self::new(payload, media_type))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.payload)
    }

    pub fn decode(&self) -> Result<Vec<u8>, SessionError> {
        if self.payload.trim().is_empty() {
            return Err(SessionError::InvalidInput("image payload is empty".to_string()));
        }
        BASE64
            .decode(self.payload.trim().as_bytes())
            .map_err(|err| SessionError::InvalidInput(format!("payload is not base64: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub image: ImageState,
    pub label: String,
}

/// Linear edit timeline with a cursor. Editing after a revert drops the
/// undone branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditHistory {
    entries: Vec<HistoryEntry>,
    cursor: usize,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, image: ImageState, label: impl Into<String>) {
        self.entries = vec![HistoryEntry {
            image,
            label: label.into(),
        }];
        self.cursor = 0;
    }

    /// Returns the new cursor. Truncation and push happen under one `&mut`
    /// borrow, so no reader can see the pruned-but-not-pushed state.
    pub fn append(
        &mut self,
        image: ImageState,
        label: impl Into<String>,
    ) -> Result<usize, SessionError> {
        if self.entries.is_empty() {
            return Err(SessionError::EmptyHistory);
        }
        self.entries.truncate(self.cursor + 1);
        self.entries.push(HistoryEntry {
            image,
            label: label.into(),
        });
        self.cursor = self.entries.len() - 1;
        Ok(self.cursor)
    }

    pub fn revert(&mut self, index: usize) -> Result<&HistoryEntry, SessionError> {
        if index >= self.entries.len() {
            return Err(SessionError::OutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        self.cursor = index;
        Ok(&self.entries[index])
    }

    pub fn current(&self) -> Result<&HistoryEntry, SessionError> {
        self.entries
            .get(self.cursor)
            .ok_or(SessionError::EmptyHistory)
    }

    /// Back to just the seed entry.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.entries.is_empty() {
            return Err(SessionError::EmptyHistory);
        }
        self.entries.truncate(1);
        self.cursor = 0;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.label.clone()).collect()
    }
}
