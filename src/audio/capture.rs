use super::format::AudioFormat;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use ringbuf::{HeapRb, traits::*};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};

/// Keeps a capture running. Dropping it stops the capture; chunks already
/// captured are still delivered, then the chunk channel closes.
pub trait ActiveCapture {}

/// Running cpal input stream
struct CpalStream {
    stream: Option<cpal::Stream>,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ActiveCapture for CpalStream {}

impl Drop for CpalStream {
    fn drop(&mut self) {
        // Stop the callback first so nothing lands in the ring after the flush
        drop(self.stream.take());
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Source of microphone audio
pub trait CaptureBackend {
    /// Check that the devices needed for recording and playing back are available
    fn configure_session(&self) -> Result<()>;

    /// Begin capturing. Chunks arrive on `chunk_tx`, stream errors on `error_tx`.
    fn start(
        &self,
        format: AudioFormat,
        chunk_tx: mpsc::Sender<Vec<f32>>,
        error_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Box<dyn ActiveCapture>>;
}

/// Default host input device via cpal
pub struct CpalCapture;

impl CaptureBackend for CpalCapture {
    fn configure_session(&self) -> Result<()> {
        let host = cpal::default_host();
        host.default_input_device()
            .context("No input audio device available")?;
        host.default_output_device()
            .context("No output audio device available")?;
        Ok(())
    }

    /// Must be called from within a `LocalSet`: the bridge task is spawned locally.
    fn start(
        &self,
        format: AudioFormat,
        chunk_tx: mpsc::Sender<Vec<f32>>,
        error_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Box<dyn ActiveCapture>> {
        let ring = HeapRb::<f32>::new(format.samples_for_duration(60.0));
        let (mut producer, consumer) = ring.split();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input audio device available")?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let notify = Arc::new(Notify::new());
        let notify_callback = notify.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    producer.push_slice(data);
                    notify_callback.notify_one();
                },
                move |err| {
                    let _ = error_tx.send(err.to_string());
                },
                None,
            )
            .context("Failed to build input stream")?;

        stream.play().context("Failed to start audio stream")?;

        let chunk_size = format.samples_for_duration(0.1);
        let stopped = Arc::new(AtomicBool::new(false));
        tokio::task::spawn_local(bridge_task(
            consumer,
            chunk_tx,
            chunk_size,
            notify.clone(),
            stopped.clone(),
        ));

        tracing::info!(
            "Audio capture started ({} Hz, {} ch)",
            format.sample_rate,
            format.channels
        );
        Ok(Box::new(CpalStream {
            stream: Some(stream),
            stopped,
            notify,
        }))
    }
}

/// Forward full chunks from the ring buffer. Once the stream has stopped,
/// send whatever is left as a final short chunk and exit, closing `tx`.
async fn bridge_task(
    mut consumer: impl Consumer<Item = f32>,
    tx: mpsc::Sender<Vec<f32>>,
    chunk_size: usize,
    notify: Arc<Notify>,
    stopped: Arc<AtomicBool>,
) {
    loop {
        notify.notified().await;

        let stopping = stopped.load(Ordering::Acquire);
        loop {
            let available = consumer.occupied_len();
            if available == 0 || (available < chunk_size && !stopping) {
                break;
            }

            let mut chunk = vec![0.0f32; available.min(chunk_size)];
            let n = consumer.pop_slice(&mut chunk);
            chunk.truncate(n);

            if tx.send(chunk).await.is_err() {
                return;
            }
        }

        if stopping {
            tracing::debug!("Capture stopped, bridge flushed");
            return;
        }
    }
}
