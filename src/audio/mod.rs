pub mod capture;
pub mod format;
pub mod playback;
pub mod sink;
pub mod wav_sink;

pub use capture::{ActiveCapture, CaptureBackend, CpalCapture};
pub use format::AudioFormat;
pub use playback::{Player, RodioPlayer};
pub use sink::AudioSink;
pub use wav_sink::WavSink;
