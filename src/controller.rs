use crate::audio::Player;
use crate::error::ScanResult;
use crate::messages::RecorderEvent;
use crate::services::RecorderHandle;
use crate::store::{RecordStore, TagRecord};
use crate::tag::Scanner;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;

const NO_TAG_MESSAGE: &str = "No tag detected, please touch an EchoTag first";
const NO_AUDIO_MESSAGE: &str = "No audio for this EchoTag, please record";

pub const RECORDING_EXTENSION: &str = "wav";

/// What the user sees between actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerState {
    /// Identifier of the last tag scanned in this session, empty if none
    pub scanned_id: String,
    /// Saved recording for `scanned_id`, empty if none
    pub audio_name: String,
    pub is_recording: bool,
    /// A stopped recording waits in the temporary file
    pub pending_save: bool,
    pub scanning: bool,
    pub status: String,
}

/// Sequences user actions across the scanner, recorder and store
pub struct Controller {
    scanner: Scanner,
    recorder: RecorderHandle,
    store: RecordStore,
    player: Box<dyn Player>,
    recordings_dir: PathBuf,
    auto_play: bool,
    state: ControllerState,
}

impl Controller {
    pub fn new(
        scanner: Scanner,
        recorder: RecorderHandle,
        store: RecordStore,
        player: Box<dyn Player>,
        recordings_dir: PathBuf,
    ) -> Self {
        Self {
            scanner,
            recorder,
            store,
            player,
            recordings_dir,
            auto_play: true,
            state: ControllerState::default(),
        }
    }

    /// Play a tag's recording as soon as it is scanned
    pub fn with_auto_play(mut self, auto_play: bool) -> Self {
        self.auto_play = auto_play;
        self
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn records(&self) -> Vec<TagRecord> {
        self.store.records()
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.state.status = status.into();
        tracing::debug!("status: {}", self.state.status);
    }

    /// Clear per-scan state and open a scan session. The receiver resolves
    /// once with the scan outcome; hand it to `on_scan_result`.
    pub async fn begin_scan(&mut self) -> Option<oneshot::Receiver<ScanResult>> {
        if self.state.scanning {
            self.set_status("Scan already in progress");
            return None;
        }

        self.reset_state_and_delete_temporary_file().await;

        let known_id = Some(self.state.scanned_id.clone()).filter(|id| !id.is_empty());
        self.state.scanning = true;
        self.set_status("Hold your tag near the reader");
        Some(self.scanner.spawn_scan(known_id))
    }

    pub async fn on_scan_result(&mut self, result: ScanResult) {
        self.state.scanning = false;
        match result {
            Ok(id) => {
                tracing::info!("Scan successful, UID: {}", id);
                self.state.scanned_id = id.clone();
                self.handle_scanned_id(&id).await;
            }
            Err(e) => self.set_status(format!("Scan failed: {}", e)),
        }
    }

    async fn handle_scanned_id(&mut self, id: &str) {
        match self.store.find(id).map(|r| r.audio_filename.clone()) {
            Some(filename) => {
                self.state.audio_name = filename;
                self.set_status(format!("UID {}: found this tag", id));
                if self.auto_play {
                    self.play().await;
                }
            }
            None => self.set_status(format!("UID {}: no record for this tag", id)),
        }
    }

    fn ensure_scanned_id_exists(&mut self) -> bool {
        if self.state.scanned_id.is_empty() {
            self.set_status(NO_TAG_MESSAGE);
            return false;
        }
        true
    }

    fn ensure_audio_exists(&mut self) -> bool {
        if self.state.audio_name.is_empty() {
            self.set_status(NO_AUDIO_MESSAGE);
            return false;
        }
        true
    }

    /// Start recording, or stop when already recording
    pub async fn toggle_recording(&mut self) {
        if !self.ensure_scanned_id_exists() {
            return;
        }

        tracing::debug!("toggle_recording: recorder is {:?}", self.recorder.state());

        if self.state.is_recording {
            self.state.is_recording = false;
            match self.recorder.stop().await {
                Ok(()) => {
                    self.state.pending_save = true;
                    self.set_status("Recording stopped.");
                }
                Err(e) => self.set_status(e.to_string()),
            }
        } else {
            // Never capture while a recording is still coming out of the speaker
            if self.player.is_playing() {
                tracing::info!("Stopping playback before recording");
                self.player.stop().await;
            }
            match self.recorder.start().await {
                Ok(()) => {
                    self.state.is_recording = true;
                    self.state.pending_save = false;
                    self.set_status("Recording started...");
                }
                Err(e) => self.set_status(e.to_string()),
            }
        }
    }

    /// Save under a fresh `recording_<unix-timestamp>` name
    pub async fn save(&mut self) {
        let name = self.unique_file_name();
        self.save_as(&name).await;
    }

    /// Move the pending recording to `name` and point the scanned tag at it
    pub async fn save_as(&mut self, name: &str) {
        if !self.ensure_scanned_id_exists() {
            return;
        }
        if self.state.is_recording {
            self.set_status("Stop recording before saving");
            return;
        }

        if let Err(e) = self.recorder.save(&self.recordings_dir, name).await {
            self.set_status(e.to_string());
            return;
        }
        self.state.pending_save = false;

        let tag_id = self.state.scanned_id.clone();
        if let Err(e) = self.store.upsert(&tag_id, name) {
            tracing::error!("Recording saved but not linked to {}: {}", tag_id, e);
            self.set_status(format!("Error saving record: {}", e));
            return;
        }

        self.state.audio_name = name.to_string();
        self.set_status("Recording Saved");
    }

    /// Play the pending recording if there is one, otherwise the tag's saved recording
    pub async fn play(&mut self) {
        if !self.ensure_scanned_id_exists() {
            return;
        }
        if self.state.is_recording {
            self.set_status("Stop recording before playing");
            return;
        }

        let path = if self.state.pending_save {
            self.recorder.temp_path().to_path_buf()
        } else {
            if !self.ensure_audio_exists() {
                return;
            }
            self.recordings_dir.join(&self.state.audio_name)
        };

        match self.player.play(&path).await {
            Ok(()) => self.set_status(format!("Playing {}", display_name(&path))),
            Err(e) => self.set_status(format!("Could not load file for playback: {:#}", e)),
        }
    }

    /// Forget the scanned tag's recording and the tag itself
    pub async fn delete(&mut self) {
        if !self.ensure_scanned_id_exists() || !self.ensure_audio_exists() {
            return;
        }

        let tag_id = self.state.scanned_id.clone();
        if let Err(e) = self.store.delete(&tag_id) {
            self.set_status(e.to_string());
            return;
        }

        let audio_path = self.recordings_dir.join(&self.state.audio_name);
        if let Err(e) = tokio::fs::remove_file(&audio_path).await {
            tracing::warn!("Failed to remove {:?}: {}", audio_path, e);
        }

        self.state.scanned_id.clear();
        self.state.audio_name.clear();
        self.set_status("Recording deleted");
    }

    pub fn on_recorder_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Finished { successfully: true } => {
                tracing::debug!("Recording finished successfully");
            }
            RecorderEvent::Finished { successfully: false } => {
                self.state.is_recording = false;
                self.set_status("Recording finished unsuccessfully.");
            }
            RecorderEvent::EncodingFailed(error) => {
                self.set_status(format!("Encoding error: {}", error));
            }
        }
    }

    async fn reset_state_and_delete_temporary_file(&mut self) {
        tracing::debug!("Resetting transient state");
        self.recorder.reset().await;
        self.state.is_recording = false;
        self.state.pending_save = false;
        self.state.audio_name.clear();
        self.state.status.clear();
    }

    fn unique_file_name(&self) -> String {
        let mut timestamp = chrono::Utc::now().timestamp();
        loop {
            let name = format!("recording_{}.{}", timestamp, RECORDING_EXTENSION);
            if !self.recordings_dir.join(&name).exists() {
                return name;
            }
            timestamp += 1;
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
