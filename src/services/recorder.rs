use crate::audio::{ActiveCapture, AudioFormat, AudioSink, CaptureBackend, WavSink};
use crate::error::RecordError;
use crate::messages::{RecorderCommand, RecorderEvent, RecorderState};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// How long `stop` waits for the capture to hand over its last samples
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Owns the recording session: capture device, encoder and temporary file
///
/// This service:
/// - Captures into a single well-known temporary file
/// - Streams chunks to the WAV sink while recording
/// - Moves the finished file to its permanent name on save
/// - Reports encoding problems as events instead of failing the session
///
/// Note: the capture handle wraps cpal::Stream which is !Send, so the service
/// must run on a LocalSet (see `Recorder::spawn`).
pub struct Recorder {
    format: AudioFormat,
    temp_path: PathBuf,
    backend: Box<dyn CaptureBackend>,
    cmd_rx: mpsc::Receiver<RecorderCommand>,
    audio_rx: mpsc::Receiver<Vec<f32>>,
    error_rx: mpsc::UnboundedReceiver<String>,
    error_tx: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    state: watch::Sender<RecorderState>,
    sink: Option<Box<dyn AudioSink>>,
    capture: Option<Box<dyn ActiveCapture>>,
    encoding_failed: bool,
}

impl Recorder {
    /// Spawn the service on the current LocalSet
    pub fn spawn(
        format: AudioFormat,
        temp_path: PathBuf,
        backend: Box<dyn CaptureBackend>,
    ) -> (RecorderHandle, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(10);
        // Replaced on every start; the sender only ever lives in the capture
        let (_, audio_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RecorderState::Idle);

        let recorder = Recorder {
            format,
            temp_path: temp_path.clone(),
            backend,
            cmd_rx,
            audio_rx,
            error_rx,
            error_tx,
            events: events_tx,
            state: state_tx,
            sink: None,
            capture: None,
            encoding_failed: false,
        };
        tokio::task::spawn_local(recorder.run());

        (
            RecorderHandle {
                tx: cmd_tx,
                state: state_rx,
                temp_path,
            },
            events_rx,
        )
    }

    async fn run(mut self) {
        loop {
            let recording = self.is_recording();
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                // Receive and process audio chunks (only when recording)
                Some(chunk) = self.audio_rx.recv(), if recording => {
                    self.write_chunk(chunk);
                }

                Some(error) = self.error_rx.recv() => {
                    tracing::error!("Audio stream error: {}", error);
                    self.report_encoding_failure(error);
                }
            }
        }

        self.discard_session().await;
        tracing::debug!("Recorder stopped: all handles dropped");
    }

    fn is_recording(&self) -> bool {
        *self.state.borrow() == RecorderState::Recording
    }

    fn set_state(&self, state: RecorderState) {
        tracing::debug!("Recorder state -> {:?}", state);
        self.state.send_replace(state);
    }

    fn write_chunk(&mut self, chunk: Vec<f32>) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        // Stream chunk to sink (Vec is moved, no copy)
        if let Err(e) = sink.write_chunk(chunk) {
            tracing::error!("Failed to write audio chunk: {}", e);
            self.report_encoding_failure(e.to_string());
        }
    }

    /// Only the first failure of a recording is reported
    fn report_encoding_failure(&mut self, error: String) {
        if self.encoding_failed {
            return;
        }
        self.encoding_failed = true;
        let _ = self.events.send(RecorderEvent::EncodingFailed(error));
    }

    async fn handle_command(&mut self, cmd: RecorderCommand) {
        match cmd {
            RecorderCommand::Start(reply) => {
                let _ = reply.send(self.start().await);
            }
            RecorderCommand::Stop(reply) => {
                let _ = reply.send(self.stop().await);
            }
            RecorderCommand::Save { dir, name, reply } => {
                let _ = reply.send(self.save(&dir, &name).await);
            }
            RecorderCommand::Reset(reply) => {
                self.discard_session().await;
                let _ = reply.send(());
            }
        }
    }

    async fn start(&mut self) -> Result<(), RecordError> {
        if self.is_recording() {
            tracing::debug!("Already recording, ignoring start");
            return Ok(());
        }

        self.backend
            .configure_session()
            .map_err(|e| RecordError::SessionSetupFailed(format!("{:#}", e)))?;

        remove_if_exists(&self.temp_path).await;
        tracing::info!("Temporary audio file: {:?}", self.temp_path);

        let sink = WavSink::new(self.temp_path.clone(), self.format)
            .map_err(|e| RecordError::RecordingFailed(format!("{:#}", e)))?;

        // Fresh channel per recording so chunks from an earlier capture never leak in
        let (audio_tx, audio_rx) = mpsc::channel(100);
        self.audio_rx = audio_rx;

        match self
            .backend
            .start(self.format, audio_tx, self.error_tx.clone())
        {
            Ok(capture) => {
                self.sink = Some(Box::new(sink));
                self.capture = Some(capture);
                self.encoding_failed = false;
                self.set_state(RecorderState::Recording);
                tracing::info!("Recording started");
                Ok(())
            }
            Err(e) => {
                drop(sink);
                remove_if_exists(&self.temp_path).await;
                Err(RecordError::RecordingFailed(format!("{:#}", e)))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), RecordError> {
        if !self.is_recording() {
            tracing::debug!("Not recording, ignoring stop");
            return Ok(());
        }

        // Drop the stream to stop audio capture
        self.capture = None;

        // Write everything the capture still delivers, up to the channel closing
        if tokio::time::timeout(FLUSH_TIMEOUT, self.drain_audio())
            .await
            .is_err()
        {
            tracing::warn!("Capture did not flush within {:?}, dropping the tail", FLUSH_TIMEOUT);
            // Closing our end makes the bridge's next send fail so it exits
            let (_, closed) = mpsc::channel(1);
            self.audio_rx = closed;
        }

        let finalized = match self.sink.take() {
            Some(mut sink) => sink.finalize().await,
            None => Err(anyhow::anyhow!("No encoder for the current recording")),
        };

        match finalized {
            Ok(()) => {
                self.set_state(RecorderState::PendingSave);
                let _ = self.events.send(RecorderEvent::Finished { successfully: true });
                tracing::info!("Recording stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Recording finished unsuccessfully: {}", e);
                self.set_state(RecorderState::Idle);
                let _ = self.events.send(RecorderEvent::Finished { successfully: false });
                Err(RecordError::EncodingFailed(format!("{:#}", e)))
            }
        }
    }

    async fn drain_audio(&mut self) {
        while let Some(chunk) = self.audio_rx.recv().await {
            self.write_chunk(chunk);
        }
    }

    async fn save(&mut self, dir: &Path, name: &str) -> Result<PathBuf, RecordError> {
        if self.is_recording() {
            return Err(RecordError::SaveFailed(
                "recording is still in progress".to_string(),
            ));
        }
        if !tokio::fs::try_exists(&self.temp_path).await.unwrap_or(false) {
            return Err(RecordError::SaveFailed("no recording to save".to_string()));
        }

        let destination = dir.join(name);
        move_file(&self.temp_path, &destination)
            .await
            .map_err(|e| RecordError::SaveFailed(format!("{}: {}", destination.display(), e)))?;

        self.set_state(RecorderState::Idle);
        tracing::info!("Recording saved to {:?}", destination);
        Ok(destination)
    }

    /// Stop any capture and remove the temporary file
    async fn discard_session(&mut self) {
        self.capture = None;
        self.sink = None;
        remove_if_exists(&self.temp_path).await;
        self.set_state(RecorderState::Idle);
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed temporary file {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove temporary file {:?}: {}", path, e),
    }
}

/// Move `from` to `to`, replacing `to`. Falls back to copy and delete when
/// the two paths are on different filesystems. On failure `to` is left
/// untouched or absent, never half written.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            let staging = to.with_extension("partial");
            if let Err(e) = tokio::fs::copy(from, &staging).await {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e);
            }
            tokio::fs::rename(&staging, to).await?;
            tokio::fs::remove_file(from).await
        }
        Err(e) => Err(e),
    }
}

/// Handle for communicating with the Recorder
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderCommand>,
    state: watch::Receiver<RecorderState>,
    temp_path: PathBuf,
}

impl RecorderHandle {
    pub fn state(&self) -> RecorderState {
        *self.state.borrow()
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub async fn start(&self) -> Result<(), RecordError> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderCommand::Start(reply))
            .await
            .map_err(RecordError::RecordingFailed)?;
        rx.await
            .map_err(|e| RecordError::RecordingFailed(e.to_string()))?
    }

    /// Stop capturing. Does nothing when not recording.
    pub async fn stop(&self) -> Result<(), RecordError> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderCommand::Stop(reply))
            .await
            .map_err(RecordError::EncodingFailed)?;
        rx.await
            .map_err(|e| RecordError::EncodingFailed(e.to_string()))?
    }

    /// Move the finished recording to `dir/name`, replacing any file there
    pub async fn save(&self, dir: &Path, name: &str) -> Result<PathBuf, RecordError> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderCommand::Save {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            reply,
        })
        .await
        .map_err(RecordError::SaveFailed)?;
        rx.await.map_err(|e| RecordError::SaveFailed(e.to_string()))?
    }

    /// Stop any capture and delete the temporary file
    pub async fn reset(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(RecorderCommand::Reset(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, cmd: RecorderCommand) -> Result<(), String> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| "recorder service is not running".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCapture;
    use tempfile::tempdir;
    use tokio::task::LocalSet;

    fn spawn(
        temp_path: PathBuf,
        backend: FakeCapture,
    ) -> (RecorderHandle, mpsc::UnboundedReceiver<RecorderEvent>) {
        Recorder::spawn(AudioFormat::default(), temp_path, Box::new(backend))
    }

    #[tokio::test]
    async fn test_record_stop_save() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let temp = dir.path().join("temp.wav");
                let saved_dir = dir.path().join("recordings");
                let (recorder, mut events) = spawn(temp.clone(), FakeCapture::default());

                recorder.start().await.unwrap();
                assert_eq!(recorder.state(), RecorderState::Recording);

                recorder.stop().await.unwrap();
                assert_eq!(recorder.state(), RecorderState::PendingSave);
                assert_eq!(
                    events.recv().await,
                    Some(RecorderEvent::Finished { successfully: true })
                );

                let path = recorder
                    .save(&saved_dir, "recording_1700000000.wav")
                    .await
                    .unwrap();
                assert_eq!(path, saved_dir.join("recording_1700000000.wav"));
                assert!(path.exists());
                assert!(!temp.exists());
                assert_eq!(recorder.state(), RecorderState::Idle);

                let reader = hound::WavReader::open(&path).unwrap();
                assert_eq!(reader.spec().sample_rate, 44100);
                assert_eq!(reader.len(), FakeCapture::CHUNK_LEN as u32);
            })
            .await;
    }

    #[tokio::test]
    async fn test_stop_keeps_samples_flushed_after_capture_ends() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let saved_dir = dir.path().join("recordings");
                let backend = FakeCapture {
                    tail_len: 118,
                    ..FakeCapture::default()
                };
                let (recorder, _events) = spawn(dir.path().join("temp.wav"), backend);

                recorder.start().await.unwrap();
                recorder.stop().await.unwrap();
                let path = recorder.save(&saved_dir, "tail.wav").await.unwrap();

                let reader = hound::WavReader::open(&path).unwrap();
                assert_eq!(reader.len(), (FakeCapture::CHUNK_LEN + 118) as u32);
            })
            .await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_idle() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let (recorder, _events) =
                    spawn(dir.path().join("temp.wav"), FakeCapture::default());

                recorder.stop().await.unwrap();
                recorder.stop().await.unwrap();

                assert_eq!(recorder.state(), RecorderState::Idle);
            })
            .await;
    }

    #[tokio::test]
    async fn test_save_without_recording_fails_cleanly() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let (recorder, _events) =
                    spawn(dir.path().join("temp.wav"), FakeCapture::default());

                let err = recorder.save(dir.path(), "out.wav").await.unwrap_err();

                assert!(matches!(err, RecordError::SaveFailed(_)));
                assert!(!dir.path().join("out.wav").exists());
            })
            .await;
    }

    #[tokio::test]
    async fn test_save_replaces_existing_file() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let (recorder, _events) =
                    spawn(dir.path().join("temp.wav"), FakeCapture::default());
                std::fs::write(dir.path().join("out.wav"), b"old").unwrap();

                recorder.start().await.unwrap();
                recorder.stop().await.unwrap();
                recorder.save(dir.path(), "out.wav").await.unwrap();

                let bytes = std::fs::read(dir.path().join("out.wav")).unwrap();
                assert_eq!(&bytes[..4], b"RIFF");
            })
            .await;
    }

    #[tokio::test]
    async fn test_save_to_unwritable_destination() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let temp = dir.path().join("temp.wav");
                let (recorder, _events) = spawn(temp.clone(), FakeCapture::default());
                let blocker = dir.path().join("not-a-dir");
                std::fs::write(&blocker, b"").unwrap();

                recorder.start().await.unwrap();
                recorder.stop().await.unwrap();
                let err = recorder.save(&blocker, "out.wav").await.unwrap_err();

                assert!(matches!(err, RecordError::SaveFailed(_)));
                assert!(temp.exists());
                assert_eq!(recorder.state(), RecorderState::PendingSave);
            })
            .await;
    }

    #[tokio::test]
    async fn test_save_while_recording_is_refused() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let (recorder, _events) =
                    spawn(dir.path().join("temp.wav"), FakeCapture::default());

                recorder.start().await.unwrap();
                let err = recorder.save(dir.path(), "out.wav").await.unwrap_err();

                assert!(matches!(err, RecordError::SaveFailed(_)));
                assert_eq!(recorder.state(), RecorderState::Recording);
            })
            .await;
    }

    #[tokio::test]
    async fn test_device_failures() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let temp = dir.path().join("temp.wav");

                let backend = FakeCapture {
                    fail_configure: true,
                    ..FakeCapture::default()
                };
                let (recorder, _events) = spawn(temp.clone(), backend);
                assert!(matches!(
                    recorder.start().await,
                    Err(RecordError::SessionSetupFailed(_))
                ));

                let backend = FakeCapture {
                    fail_start: true,
                    ..FakeCapture::default()
                };
                let (recorder, _events) = spawn(temp.clone(), backend);
                assert!(matches!(
                    recorder.start().await,
                    Err(RecordError::RecordingFailed(_))
                ));
                assert_eq!(recorder.state(), RecorderState::Idle);
                assert!(!temp.exists());
            })
            .await;
    }

    #[tokio::test]
    async fn test_stream_error_reported_without_ending_session() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let backend = FakeCapture {
                    stream_error: Some("buffer overrun".to_string()),
                    ..FakeCapture::default()
                };
                let (recorder, mut events) = spawn(dir.path().join("temp.wav"), backend);

                recorder.start().await.unwrap();
                assert_eq!(
                    events.recv().await,
                    Some(RecorderEvent::EncodingFailed("buffer overrun".to_string()))
                );
                assert_eq!(recorder.state(), RecorderState::Recording);

                recorder.stop().await.unwrap();
                assert_eq!(recorder.state(), RecorderState::PendingSave);
            })
            .await;
    }

    #[tokio::test]
    async fn test_reset_discards_temporary_file() {
        LocalSet::new()
            .run_until(async {
                let dir = tempdir().unwrap();
                let temp = dir.path().join("temp.wav");
                let (recorder, _events) = spawn(temp.clone(), FakeCapture::default());

                recorder.start().await.unwrap();
                recorder.stop().await.unwrap();
                assert!(temp.exists());

                recorder.reset().await;

                assert!(!temp.exists());
                assert_eq!(recorder.state(), RecorderState::Idle);
            })
            .await;
    }
}
