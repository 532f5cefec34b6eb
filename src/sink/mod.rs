//! Sink trait and implementations for audio output.
//!
//! An [`AudioSink`] is the blocking playback destination the mixer drives.
//! The crate provides two built-in sinks:
//!
//! - [`DeviceSink`]: plays through the system audio device via cpal
//! - [`WavSink`]: writes the mixed output to a 32-bit WAV file
//!
//! Implement the trait for custom destinations like network transports or
//! loudness processors.

mod device;
mod file;

pub use device::{list_output_devices, DeviceSink};
pub use file::WavSink;

use crate::error::SinkError;
use crate::sample::Sample;

/// A blocking playback destination at the engine's output format.
///
/// The sink lives entirely on the mixer thread: it is constructed there
/// (via the factory passed to
/// [`MixerEngine::open`](crate::MixerEngine::open)), called only from the
/// mixer loop, and closed when the loop exits. Implementations therefore
/// need no internal locking and need not be `Send`.
///
/// # Call sequence
///
/// `prepare` is called before the first write and again after every
/// `drain`. `write` may block for up to roughly one latency period while
/// the device catches up. On a write error the mixer calls `recover`
/// exactly once and retries; a second failure stops the mixer. `close` is
/// always called, even after failures.
///
/// # Example
///
/// ```
/// use mixdown::{AudioSink, Sample, SinkError};
///
/// struct NullSink;
///
/// impl AudioSink for NullSink {
///     fn name(&self) -> &str {
///         "null"
///     }
///
///     fn prepare(&mut self) -> Result<(), SinkError> {
///         Ok(())
///     }
///
///     fn write(&mut self, block: &[Sample]) -> Result<usize, SinkError> {
///         Ok(block.len()) // pretend one channel
///     }
///
///     fn drain(&mut self) -> Result<(), SinkError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AudioSink {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Starts (or restarts) playback. Called before the first write and
    /// after every `drain`.
    fn prepare(&mut self) -> Result<(), SinkError>;

    /// Plays a block of interleaved samples at the engine's output
    /// format. Returns the number of *frames* written; a short count is
    /// logged by the mixer but not fatal.
    fn write(&mut self, block: &[Sample]) -> Result<usize, SinkError>;

    /// Plays out everything buffered, then stops the device. The mixer
    /// calls this after `max_silence` of idle output.
    fn drain(&mut self) -> Result<(), SinkError>;

    /// One-shot recovery after a failed write. Return `Ok(())` to have the
    /// mixer retry the write once; the default gives up immediately.
    fn recover(&mut self, error: SinkError) -> Result<(), SinkError> {
        Err(error)
    }

    /// Releases the output. Called exactly once when the mixer exits.
    fn close(&mut self) {}
}
