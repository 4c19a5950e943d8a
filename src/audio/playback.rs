use anyhow::{Context, Result};
use async_trait::async_trait;
use rodio::OutputStreamBuilder;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[async_trait]
pub trait Player: Send + Sync {
    /// Start playing `path`, replacing anything already playing. Returns once
    /// playback has begun or failed to; the audio keeps playing in the background.
    async fn play(&self, path: &Path) -> Result<()>;

    fn is_playing(&self) -> bool;

    /// Stop playback and wait until the output device is released. Does
    /// nothing when idle.
    async fn stop(&self);
}

/// One file being played on the blocking pool
struct Playback {
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    done: oneshot::Receiver<()>,
}

/// Plays files on the default output device
#[derive(Default)]
pub struct RodioPlayer {
    current: Mutex<Option<Playback>>,
}

impl RodioPlayer {
    fn take_current(&self) -> Option<Playback> {
        match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl Player for RodioPlayer {
    async fn play(&self, path: &Path) -> Result<()> {
        self.stop().await;

        let path = path.to_path_buf();
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let cancel = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let playback = Playback {
            cancel: cancel.clone(),
            finished: finished.clone(),
            done: done_rx,
        };

        tokio::task::spawn_blocking(move || {
            let _done = done_tx;
            let (_stream, sink) = match open_sink(&path) {
                Ok(playing) => playing,
                Err(e) => {
                    finished.store(true, Ordering::Release);
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };
            let _ = started_tx.send(Ok(()));

            while !sink.empty() && !cancel.load(Ordering::Acquire) {
                std::thread::sleep(STOP_POLL_INTERVAL);
            }
            sink.stop();
            finished.store(true, Ordering::Release);
            tracing::debug!("Finished playing {}", path.display());
        });

        started_rx.await.context("Playback thread exited early")??;

        if let Ok(mut current) = self.current.lock() {
            *current = Some(playback);
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        match self.current.lock() {
            Ok(current) => current
                .as_ref()
                .is_some_and(|p| !p.finished.load(Ordering::Acquire)),
            Err(_) => false,
        }
    }

    async fn stop(&self) {
        let Some(playback) = self.take_current() else {
            return;
        };
        playback.cancel.store(true, Ordering::Release);
        // Resolves once the playback thread drops its end
        let _ = playback.done.await;
    }
}

fn open_sink(path: &Path) -> Result<(rodio::OutputStream, rodio::Sink)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let stream_handle = OutputStreamBuilder::open_default_stream()
        .map_err(|e| anyhow::anyhow!("Failed to open audio output: {}", e))?;
    let sink = rodio::play(stream_handle.mixer(), BufReader::new(file))
        .map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", path.display(), e))?;

    Ok((stream_handle, sink))
}
