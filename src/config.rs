//! Engine configuration.

use std::time::Duration;

use crate::error::EngineError;
use crate::format::AudioFormat;

/// Lower bound on sink latency; shorter values are clamped up.
const MIN_LATENCY: Duration = Duration::from_millis(10);

/// Configuration for a [`MixerEngine`](crate::MixerEngine).
///
/// The output format is fixed for the lifetime of the engine. Use
/// [`EngineConfig::default()`] for CD-style stereo output, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use mixdown::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig {
///     sample_rate: 48000,
///     latency: Duration::from_millis(20),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    ///
    /// Default: 44100
    pub sample_rate: u32,

    /// Output channel count.
    ///
    /// Default: 2
    pub channels: u16,

    /// Target sink latency. Values below 10ms are clamped up; the mixer
    /// also sleeps this long per idle pass while the sink is stopped.
    ///
    /// Default: 50ms
    pub latency: Duration,

    /// How long the mixer feeds silence to a running sink before draining
    /// it and going idle.
    ///
    /// Default: 5s
    pub max_silence: Duration,

    /// Interleaved samples pulled from each stream per mixer pass. Larger
    /// blocks lower overhead, smaller blocks tighten transport response.
    ///
    /// Default: 4096
    pub mix_block: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            latency: Duration::from_millis(50),
            max_silence: Duration::from_secs(5),
            mix_block: 4096,
        }
    }
}

impl EngineConfig {
    /// The output format as a descriptor.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    /// The configured latency with the 10ms floor applied.
    pub fn effective_latency(&self) -> Duration {
        self.latency.max(MIN_LATENCY)
    }

    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample rate is zero".into()));
        }
        if self.channels == 0 {
            return Err(EngineError::InvalidConfig("channel count is zero".into()));
        }
        if self.mix_block == 0 || self.mix_block % self.channels as usize != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "mix block of {} samples is not a whole number of {}-channel frames",
                self.mix_block, self.channels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.latency, Duration::from_millis(50));
        assert_eq!(config.max_silence, Duration::from_secs(5));
        assert_eq!(config.mix_block, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency_floor() {
        let config = EngineConfig {
            latency: Duration::from_millis(1),
            ..Default::default()
        };
        assert_eq!(config.effective_latency(), Duration::from_millis(10));
    }

    #[test]
    fn test_rejects_zero_rate() {
        let config = EngineConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_ragged_mix_block() {
        let config = EngineConfig {
            channels: 2,
            mix_block: 4097,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
