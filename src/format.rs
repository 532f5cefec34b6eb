//! Audio format descriptor.

use std::time::Duration;

/// A sample rate / channel count pair describing interleaved PCM audio.
///
/// The all-zero value is a sentinel meaning "unknown or unchanged"; input
/// callbacks may report it to indicate the format of the previous batch
/// still applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo).
    pub channels: u16,
}

impl AudioFormat {
    /// The sentinel value: format unknown or unchanged.
    pub const UNKNOWN: AudioFormat = AudioFormat {
        sample_rate: 0,
        channels: 0,
    };

    /// Creates a format descriptor.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Returns `true` if this is the sentinel value.
    pub fn is_unknown(&self) -> bool {
        self.sample_rate == 0 && self.channels == 0
    }

    /// Interleaved samples per second (`sample_rate × channels`).
    pub fn samples_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels)
    }

    /// Returns the play time of `samples` interleaved samples at this
    /// format. Zero for the sentinel.
    pub fn duration_for(&self, samples: u64) -> Duration {
        let per_second = self.samples_per_second();
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(((u128::from(samples) * 1_000_000) / u128::from(per_second)) as u64)
    }

    /// Returns the number of interleaved samples covering `duration` at
    /// this format.
    pub fn samples_for(&self, duration: Duration) -> u64 {
        ((duration.as_micros() * u128::from(self.samples_per_second())) / 1_000_000) as u64
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            write!(f, "unknown")
        } else {
            write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
        }
    }
}
