// Capture runs in f32 and is written out as 16-bit signed PCM.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const BITS_PER_SAMPLE: u16 = 16;

    /// Calculate number of samples for a given duration in seconds
    pub fn samples_for_duration(&self, seconds: f32) -> usize {
        (self.sample_rate as f32 * seconds) as usize * self.channels as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
        }
    }
}
