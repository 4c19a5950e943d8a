use anyhow::Result;
use async_trait::async_trait;

/// Streaming encoder for captured audio
///
/// Samples are written as they arrive rather than buffered for the whole
/// recording.
#[async_trait]
pub trait AudioSink: Send {
    /// Write audio samples (called repeatedly during recording)
    /// The Vec is moved to avoid copying
    fn write_chunk(&mut self, samples: Vec<f32>) -> Result<()>;

    /// Flush and close the output file
    async fn finalize(&mut self) -> Result<()>;
}
