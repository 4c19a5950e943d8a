pub mod emulated;
pub mod ndef;
pub mod scanner;

pub use emulated::EmulatedReader;
pub use ndef::NdefMessage;
pub use scanner::Scanner;

use async_trait::async_trait;
use thiserror::Error;

/// Write capability a tag reports once connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdefStatus {
    NotSupported,
    ReadWrite,
    ReadOnly,
    /// A status value this crate does not know about
    Other(u8),
}

/// A tag seen by a session. The handle only means something to the session
/// that reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedTag {
    pub handle: String,
}

/// Failure reported by a reader backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SessionFailure(pub String);

/// One bounded attempt at talking to the tags in range of the reader.
///
/// Timeouts belong to the backend: `detect` fails once the session has
/// expired or was cancelled.
#[async_trait]
pub trait TagSession: Send {
    /// Update the prompt shown to the user while the session is open
    fn set_alert_message(&mut self, message: &str);

    /// Wait until at least one tag is in range and return every tag seen
    async fn detect(&mut self) -> Result<Vec<DetectedTag>, SessionFailure>;

    /// Forget the current detection and start polling again
    async fn restart_polling(&mut self);

    async fn connect(&mut self, tag: &DetectedTag) -> Result<(), SessionFailure>;

    /// Write capability and capacity in bytes
    async fn query_status(&mut self, tag: &DetectedTag)
    -> Result<(NdefStatus, usize), SessionFailure>;

    async fn write(&mut self, tag: &DetectedTag, message: &NdefMessage)
    -> Result<(), SessionFailure>;

    /// End the session. Must be safe to call more than once.
    async fn invalidate(&mut self, error_message: Option<&str>);
}

#[async_trait]
pub trait TagReader: Send + Sync {
    async fn begin(&self, alert_message: &str) -> Result<Box<dyn TagSession>, SessionFailure>;
}
