use crate::error::RecordError;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Commands for the Recorder service
pub enum RecorderCommand {
    Start(oneshot::Sender<Result<(), RecordError>>),
    Stop(oneshot::Sender<Result<(), RecordError>>),
    Save {
        dir: PathBuf,
        name: String,
        reply: oneshot::Sender<Result<PathBuf, RecordError>>,
    },
    Reset(oneshot::Sender<()>),
}

/// Notifications the Recorder sends without being asked
#[derive(Clone, Debug, PartialEq)]
pub enum RecorderEvent {
    Finished { successfully: bool },
    EncodingFailed(String),
}

/// Recorder state (observable via watch channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    /// Stopped with a finished temporary file waiting to be saved
    PendingSave,
}
