//! # mixdown
//!
//! A multi-stream audio mixing engine: independent producer pipelines
//! feed bounded sample caches, and a single mixer thread continuously
//! pulls from all of them, applies per-stream and master gain with
//! saturating arithmetic, and drives a blocking playback sink at a fixed
//! output format.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use mixdown::{DeviceSink, EngineConfig, MixerEngine, SignalGenerator, StreamParams};
//! use std::time::Duration;
//!
//! let config = EngineConfig::default();
//! let sink_config = config.clone();
//! let engine = MixerEngine::open(config, move || {
//!     Ok(Box::new(DeviceSink::new(&sink_config)?))
//! })?;
//!
//! let mut tone = SignalGenerator::new(44100, 2);
//! tone.push_sine(440.0, 0.3, Duration::from_secs(2));
//!
//! let id = engine.add_stream(StreamParams::default(), tone.into_source(2048))?;
//! engine.play(id);
//!
//! std::thread::sleep(Duration::from_secs(3));
//! engine.close();
//! ```
//!
//! ## Architecture
//!
//! Each stream is a pipeline of `source → resampler → cache`; the mixer
//! is the one consumer on the other side of every cache:
//!
//! - **Cache** ([`SampleCache`]): bounded buffer with ready/buffering
//!   hysteresis and in-band format markers, produced either by its own
//!   thread or on demand during reads.
//! - **Stream**: cache + [`LinearResampler`] + gain and transport state
//!   (play/pause/flush/abort), addressed by [`StreamId`].
//! - **Mixer**: one thread per engine; sums volume-scaled contributions
//!   with saturation and writes blocks to the [`AudioSink`], managing the
//!   sink's stopped/running lifecycle and idle drain.
//!
//! Everything is plain blocking threads; there is no async runtime. The
//! sink lives on the mixer thread, which is why [`MixerEngine::open`]
//! takes a factory rather than a sink value.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod cache;
mod config;
mod engine;
mod error;
mod event;
mod format;
mod mixer;
mod resample;
mod sample;
mod sink;
mod source;
mod stream;

pub use cache::{CacheMode, SampleCache, SourceFn};
pub use config::EngineConfig;
pub use engine::MixerEngine;
pub use error::{CacheError, EngineError, SinkError, SourceError};
pub use event::{event_callback, EventCallback, StreamEvent};
pub use format::AudioFormat;
pub use resample::LinearResampler;
pub use sample::{
    from_normalized, saturating_mix, scale_volume, to_f32, Sample, SILENCE, VOLUME_MAX,
};
pub use sink::{list_output_devices, AudioSink, DeviceSink, WavSink};
pub use source::SignalGenerator;
pub use stream::{BufferState, PlaybackState, StreamId, StreamParams, StreamStatus};
