//! Stream identity, parameters and status.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{CacheMode, SampleCache};
use crate::event::EventCallback;
use crate::resample::LinearResampler;

/// Opaque handle to a stream within an engine.
///
/// Ids are never reused; operations on a removed id are harmless no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) u64);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Parameters for adding a stream to the engine.
///
/// # Example
///
/// ```
/// use mixdown::{CacheMode, StreamParams};
///
/// let params = StreamParams {
///     sample_rate: 48000,
///     channels: 2,
///     cache_samples: 48000, // half a second of interleaved stereo
///     mode: CacheMode::Threaded,
/// };
/// # let _ = params;
/// ```
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Input sample rate in Hz.
    pub sample_rate: u32,

    /// Input channel count.
    pub channels: u16,

    /// Cache capacity in interleaved samples at the engine's output
    /// format. The stream buffers this much before it starts playing and
    /// rebuffers to it after an underrun. Must be non-zero.
    pub cache_samples: usize,

    /// How the cache is produced into. Ignored for push streams, which
    /// have no source to pull.
    pub mode: CacheMode,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            cache_samples: 44100,
            mode: CacheMode::OnDemand,
        }
    }
}

/// Playback state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// The mixer is pulling from this stream.
    Playing,
    /// The stream is paused; its cache keeps whatever it holds.
    Paused,
    /// The source ended; the stream will never produce audio again.
    Ended,
}

/// Buffering state of a stream's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// The cache is ready to serve the mixer.
    Ready,
    /// The cache is filling towards its capacity.
    Buffering,
}

/// Point-in-time snapshot of a stream, covering playback state, play
/// position and cache health in one consistent read.
#[derive(Debug, Clone)]
pub struct StreamStatus {
    /// Current playback state.
    pub state: PlaybackState,

    /// Play time delivered to the sink so far. Monotonically
    /// non-decreasing while playing; reset by a flush.
    pub played: Duration,

    /// Whether the cache is ready or still buffering.
    pub buffer: BufferState,

    /// Cache fill percentage, 0..=100.
    pub filling: u8,

    /// Interleaved samples pending in the cache.
    pub pending: usize,
}

/// Internal per-stream state. Every field is guarded by the engine lock;
/// the mixer and all transport operations serialize on it.
pub(crate) struct StreamSlot {
    pub id: StreamId,
    /// `None` once the mixer has torn the pipeline down at end of stream.
    pub cache: Option<SampleCache>,
    pub resampler: Option<Arc<Mutex<LinearResampler>>>,
    pub playing: bool,
    pub ended: bool,
    pub aborted: bool,
    /// Interleaved output samples delivered to the mixer.
    pub played: u64,
    pub volume: u32,
    /// Requested cache size; buffering events fire only when non-zero.
    pub delay: usize,
    pub events: Option<EventCallback>,
    /// Edge detection for Buffering/Ready events.
    pub buffering: bool,
}

impl StreamSlot {
    pub(crate) fn new(
        id: StreamId,
        cache: SampleCache,
        resampler: Arc<Mutex<LinearResampler>>,
        delay: usize,
    ) -> Self {
        Self {
            id,
            cache: Some(cache),
            resampler: Some(resampler),
            playing: false,
            ended: false,
            aborted: false,
            played: 0,
            volume: crate::sample::VOLUME_MAX,
            delay,
            events: None,
            buffering: false,
        }
    }

    pub(crate) fn playback_state(&self) -> PlaybackState {
        if self.ended {
            PlaybackState::Ended
        } else if self.playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_display() {
        assert_eq!(StreamId(7).to_string(), "stream#7");
    }

    #[test]
    fn test_default_params() {
        let params = StreamParams::default();
        assert_eq!(params.sample_rate, 44100);
        assert_eq!(params.channels, 2);
        assert_eq!(params.cache_samples, 44100);
        assert_eq!(params.mode, CacheMode::OnDemand);
    }

    #[test]
    fn test_playback_state_precedence() {
        let cache = SampleCache::for_writes(16).unwrap();
        let resampler = Arc::new(Mutex::new(LinearResampler::new(
            crate::format::AudioFormat::new(44100, 2),
            crate::format::AudioFormat::new(44100, 2),
            None,
        )));
        let mut slot = StreamSlot::new(StreamId(1), cache, resampler, 16);

        assert_eq!(slot.playback_state(), PlaybackState::Paused);
        slot.playing = true;
        assert_eq!(slot.playback_state(), PlaybackState::Playing);
        // Ended wins over playing.
        slot.ended = true;
        assert_eq!(slot.playback_state(), PlaybackState::Ended);
    }
}
