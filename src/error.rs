//! Error types reported by the scanner, recorder and record store.
//!
//! Every failure reaches the controller as one of these and is rendered as a
//! status line. None of them is fatal except a store that cannot be loaded at
//! startup.

use thiserror::Error;

/// Outcome of one scan session: the tag identifier, or why it could not be resolved.
pub type ScanResult = Result<String, ScanError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Tag not supported")]
    NotSupported,

    #[error("Tag is read-only")]
    ReadOnly,

    #[error("Unknown NDEF status")]
    Unknown,

    #[error("Invalid NDEF payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to write NDEF message: {0}")]
    WriteError(String),

    /// Connect, status query, timeout or invalidation of the session itself
    #[error("{0}")]
    SessionError(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Failed to set up audio session: {0}")]
    SessionSetupFailed(String),

    #[error("Could not start recording: {0}")]
    RecordingFailed(String),

    #[error("Failed to save recording: {0}")]
    SaveFailed(String),

    #[error("Encoding error: {0}")]
    EncodingFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The mutation is visible in memory but did not reach disk.
    #[error("Failed to persist records: {0}")]
    PersistFailed(String),

    #[error("Failed to load records: {0}")]
    LoadFailed(String),
}

impl ScanError {
    /// Message shown on the reader when the session is invalidated with this error
    pub fn alert_message(&self) -> &str {
        match self {
            ScanError::NotSupported => "Tag not supported",
            ScanError::ReadOnly => "Tag is read-only",
            ScanError::Unknown => "Unknown NDEF status",
            ScanError::InvalidPayload(_) => "Invalid NDEF payload",
            ScanError::WriteError(_) => "Failed to write NDEF message",
            ScanError::SessionError(reason) => reason.as_str(),
        }
    }
}
