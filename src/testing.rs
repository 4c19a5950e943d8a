//! Stand-ins for the tag reader, microphone and speaker used by unit tests

use crate::audio::{ActiveCapture, AudioFormat, CaptureBackend, Player};
use crate::tag::{DetectedTag, NdefMessage, NdefStatus, SessionFailure, TagReader, TagSession};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn tags(count: usize) -> Vec<DetectedTag> {
    (0..count)
        .map(|i| DetectedTag {
            handle: format!("tag-{}", i),
        })
        .collect()
}

/// What the reader will answer
pub struct Script {
    pub detections: VecDeque<Result<Vec<DetectedTag>, SessionFailure>>,
    pub connect_error: Option<SessionFailure>,
    pub status: Result<(NdefStatus, usize), SessionFailure>,
    pub write_error: Option<SessionFailure>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            detections: VecDeque::new(),
            connect_error: None,
            status: Ok((NdefStatus::ReadWrite, 504)),
            write_error: None,
        }
    }
}

/// What the reader was asked to do
#[derive(Clone, Default)]
pub struct SessionLog {
    pub sessions: usize,
    pub connects: usize,
    pub restarts: usize,
    pub alerts: Vec<String>,
    pub writes: Vec<NdefMessage>,
    pub invalidations: Vec<Option<String>>,
}

#[derive(Default)]
struct Shared {
    script: Script,
    log: SessionLog,
}

/// Tag reader answering from a script. Detections run out with a timeout.
#[derive(Clone, Default)]
pub struct ScriptedReader {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedReader {
    pub fn with_detections(detections: Vec<Result<Vec<DetectedTag>, SessionFailure>>) -> Self {
        let reader = Self::default();
        reader.script(|s| s.detections = detections.into());
        reader
    }

    pub fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.shared.lock().unwrap().script);
    }

    /// Queue more detections for a later scan
    pub fn present(&self, detection: Result<Vec<DetectedTag>, SessionFailure>) {
        self.shared
            .lock()
            .unwrap()
            .script
            .detections
            .push_back(detection);
    }

    pub fn log(&self) -> SessionLog {
        self.shared.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl TagReader for ScriptedReader {
    async fn begin(&self, _alert_message: &str) -> Result<Box<dyn TagSession>, SessionFailure> {
        self.shared.lock().unwrap().log.sessions += 1;
        Ok(Box::new(ScriptedSession {
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedSession {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl TagSession for ScriptedSession {
    fn set_alert_message(&mut self, message: &str) {
        self.shared.lock().unwrap().log.alerts.push(message.to_string());
    }

    async fn detect(&mut self) -> Result<Vec<DetectedTag>, SessionFailure> {
        let next = self.shared.lock().unwrap().script.detections.pop_front();
        next.unwrap_or_else(|| Err(SessionFailure("Session timeout".to_string())))
    }

    async fn restart_polling(&mut self) {
        self.shared.lock().unwrap().log.restarts += 1;
    }

    async fn connect(&mut self, _tag: &DetectedTag) -> Result<(), SessionFailure> {
        let mut shared = self.shared.lock().unwrap();
        shared.log.connects += 1;
        match &shared.script.connect_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn query_status(
        &mut self,
        _tag: &DetectedTag,
    ) -> Result<(NdefStatus, usize), SessionFailure> {
        self.shared.lock().unwrap().script.status.clone()
    }

    async fn write(&mut self, _tag: &DetectedTag, message: &NdefMessage) -> Result<(), SessionFailure> {
        let mut shared = self.shared.lock().unwrap();
        if let Some(e) = &shared.script.write_error {
            return Err(e.clone());
        }
        shared.log.writes.push(message.clone());
        Ok(())
    }

    async fn invalidate(&mut self, error_message: Option<&str>) {
        self.shared
            .lock()
            .unwrap()
            .log
            .invalidations
            .push(error_message.map(str::to_string));
    }
}

/// Microphone that delivers one chunk of silence per recording
#[derive(Default)]
pub struct FakeCapture {
    pub fail_configure: bool,
    pub fail_start: bool,
    pub stream_error: Option<String>,
    /// Samples still buffered when the capture is dropped, sent as a last short chunk
    pub tail_len: usize,
}

impl FakeCapture {
    pub const CHUNK_LEN: usize = 441;
}

struct FakeStream {
    chunk_tx: mpsc::Sender<Vec<f32>>,
    tail_len: usize,
}

impl ActiveCapture for FakeStream {}

impl Drop for FakeStream {
    fn drop(&mut self) {
        if self.tail_len > 0 {
            let _ = self.chunk_tx.try_send(vec![0.0; self.tail_len]);
        }
    }
}

impl CaptureBackend for FakeCapture {
    fn configure_session(&self) -> Result<()> {
        if self.fail_configure {
            anyhow::bail!("No input audio device available");
        }
        Ok(())
    }

    fn start(
        &self,
        _format: AudioFormat,
        chunk_tx: mpsc::Sender<Vec<f32>>,
        error_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Box<dyn ActiveCapture>> {
        if self.fail_start {
            anyhow::bail!("Failed to build input stream");
        }
        chunk_tx
            .try_send(vec![0.0; Self::CHUNK_LEN])
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        if let Some(error) = &self.stream_error {
            let _ = error_tx.send(error.clone());
        }
        Ok(Box::new(FakeStream {
            chunk_tx,
            tail_len: self.tail_len,
        }))
    }
}

/// Speaker that remembers what it was asked to play. Playback lasts until
/// `stop` is called.
#[derive(Clone, Default)]
pub struct FakePlayer {
    played: Arc<Mutex<Vec<PathBuf>>>,
    playing: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
}

impl FakePlayer {
    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }

    /// How many times a running playback was cut short
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn play(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            anyhow::bail!("Failed to open {}", path.display());
        }
        self.played.lock().unwrap().push(path.to_path_buf());
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        if self.playing.swap(false, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}
