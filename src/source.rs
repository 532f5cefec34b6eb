//! Deterministic signal sources for tests and demos.

use std::collections::VecDeque;
use std::time::Duration;

use crate::cache::SourceFn;
use crate::error::SourceError;
use crate::format::AudioFormat;
use crate::sample::{from_normalized, Sample, SILENCE};

/// Generates synthetic audio and turns it into a [`SourceFn`].
///
/// This is how the test suite and the demos drive the engine without any
/// audio hardware or decoder: build up a signal, then hand
/// [`into_source`](Self::into_source) to
/// [`MixerEngine::add_stream`](crate::MixerEngine::add_stream).
///
/// # Example
///
/// ```
/// use mixdown::SignalGenerator;
/// use std::time::Duration;
///
/// let mut signal = SignalGenerator::new(44100, 2);
/// signal.push_sine(440.0, 0.5, Duration::from_millis(100));
/// let source = signal.into_source(1024);
/// # let _ = source;
/// ```
pub struct SignalGenerator {
    format: AudioFormat,
    samples: Vec<Sample>,
}

impl SignalGenerator {
    /// Creates a generator producing samples at the given format.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: AudioFormat::new(sample_rate, channels),
            samples: Vec::new(),
        }
    }

    /// The format of the generated signal.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Appends a sine tone. `amplitude` is normalized, 0.0..=1.0; the
    /// same value goes to every channel.
    pub fn push_sine(&mut self, frequency: f64, amplitude: f64, duration: Duration) {
        let frames = (f64::from(self.format.sample_rate) * duration.as_secs_f64()) as usize;
        let rate = f64::from(self.format.sample_rate);
        for i in 0..frames {
            let t = i as f64 / rate;
            let value = amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin();
            let sample = from_normalized(value);
            for _ in 0..self.format.channels {
                self.samples.push(sample);
            }
        }
    }

    /// Appends `count` copies of one sample value.
    pub fn push_constant(&mut self, value: Sample, count: usize) {
        self.samples.extend(std::iter::repeat(value).take(count));
    }

    /// Appends silence.
    pub fn push_silence(&mut self, duration: Duration) {
        let samples = self.format.samples_for(duration) as usize;
        self.samples
            .extend(std::iter::repeat(SILENCE).take(samples));
    }

    /// Appends raw samples.
    pub fn push_samples(&mut self, samples: &[Sample]) {
        self.samples.extend_from_slice(samples);
    }

    /// Number of interleaved samples generated so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if nothing has been generated.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Play time of the generated signal.
    pub fn duration(&self) -> Duration {
        self.format.duration_for(self.samples.len() as u64)
    }

    /// Converts into a source that yields at most `per_call` samples per
    /// invocation and reports zero (dry, not an error) once exhausted.
    pub fn into_source(self, per_call: usize) -> SourceFn {
        let format = self.format;
        let mut queue = VecDeque::from(self.samples);
        Box::new(move |dst, out| {
            *out = format;
            let take = dst.len().min(per_call).min(queue.len());
            for (slot, sample) in dst.iter_mut().zip(queue.drain(..take)) {
                *slot = sample;
            }
            Ok(take)
        })
    }

    /// Like [`into_source`](Self::into_source), but reports a terminal
    /// failure once exhausted. This models a finite track: the engine
    /// drains what is buffered and ends the stream.
    pub fn into_finite_source(self, per_call: usize) -> SourceFn {
        let format = self.format;
        let mut queue = VecDeque::from(self.samples);
        Box::new(move |dst, out| {
            *out = format;
            if queue.is_empty() {
                return Err(SourceError::new("signal exhausted"));
            }
            let take = dst.len().min(per_call).min(queue.len());
            for (slot, sample) in dst.iter_mut().zip(queue.drain(..take)) {
                *slot = sample;
            }
            Ok(take)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_length_and_shape() {
        let mut signal = SignalGenerator::new(16000, 1);
        signal.push_sine(440.0, 0.5, Duration::from_millis(100));
        assert_eq!(signal.len(), 1600);
        // A sine swings both ways.
        assert!(signal.samples.iter().any(|&s| s > SILENCE));
        assert!(signal.samples.iter().any(|&s| s < SILENCE));
    }

    #[test]
    fn test_stereo_duplicates_channels() {
        let mut signal = SignalGenerator::new(16000, 2);
        signal.push_sine(440.0, 0.5, Duration::from_millis(100));
        assert_eq!(signal.len(), 3200);
        for frame in signal.samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_duration_round_trip() {
        let mut signal = SignalGenerator::new(44100, 2);
        signal.push_silence(Duration::from_millis(250));
        assert_eq!(signal.duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_source_chunks_and_dries() {
        let mut signal = SignalGenerator::new(44100, 1);
        signal.push_constant(7 as Sample, 250);
        let mut source = signal.into_source(100);

        let mut dst = vec![SILENCE; 400];
        let mut fmt = AudioFormat::UNKNOWN;
        assert_eq!(source(&mut dst, &mut fmt).unwrap(), 100);
        assert_eq!(fmt, AudioFormat::new(44100, 1));
        assert_eq!(source(&mut dst, &mut fmt).unwrap(), 100);
        assert_eq!(source(&mut dst, &mut fmt).unwrap(), 50);
        assert_eq!(source(&mut dst, &mut fmt).unwrap(), 0);
        assert!(dst[..50].iter().all(|&s| s == 7 as Sample));
    }

    #[test]
    fn test_finite_source_errors_when_exhausted() {
        let mut signal = SignalGenerator::new(44100, 1);
        signal.push_constant(1 as Sample, 50);
        let mut source = signal.into_finite_source(100);

        let mut dst = vec![SILENCE; 100];
        let mut fmt = AudioFormat::UNKNOWN;
        assert_eq!(source(&mut dst, &mut fmt).unwrap(), 50);
        assert!(source(&mut dst, &mut fmt).is_err());
    }
}
