//! The mixing engine and its public transport API.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{SampleCache, SourceFn};
use crate::config::EngineConfig;
use crate::error::{EngineError, SinkError};
use crate::event::EventCallback;
use crate::format::AudioFormat;
use crate::mixer::Mixer;
use crate::resample::LinearResampler;
use crate::sample::{Sample, SILENCE, VOLUME_MAX};
use crate::sink::AudioSink;
use crate::stream::{BufferState, StreamId, StreamParams, StreamSlot, StreamStatus};

/// All streams known to the engine. Guarded by the engine lock; the mixer
/// iterates it once per pass, transport operations mutate it.
pub(crate) struct StreamTable {
    pub(crate) slots: Vec<StreamSlot>,
    pub(crate) next_id: u64,
}

impl StreamTable {
    fn slot(&self, id: StreamId) -> Option<&StreamSlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    fn slot_mut(&mut self, id: StreamId) -> Option<&mut StreamSlot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }
}

/// State shared between the engine handle and the mixer thread.
pub(crate) struct EngineShared {
    pub(crate) streams: Mutex<StreamTable>,
    pub(crate) stop: AtomicBool,
    pub(crate) master: AtomicU32,
    pub(crate) config: EngineConfig,
}

impl EngineShared {
    pub(crate) fn new(config: EngineConfig) -> Self {
        Self {
            streams: Mutex::new(StreamTable {
                slots: Vec::new(),
                next_id: 1,
            }),
            stop: AtomicBool::new(false),
            master: AtomicU32::new(VOLUME_MAX),
            config,
        }
    }
}

/// A multi-stream mixing engine.
///
/// The engine owns one mixer thread that continuously pulls from every
/// playing stream, sums the contributions and drives the sink. Streams
/// are added in one of two shapes:
///
/// - [`add_stream`](Self::add_stream): the engine *pulls* samples from a
///   callback, through a resampler, into the stream's cache.
/// - [`add_push_stream`](Self::add_push_stream): the caller *pushes*
///   samples with [`write_stream`](Self::write_stream).
///
/// New streams start paused. All transport operations serialize on the
/// engine lock and are safe to call from any thread; operations on an
/// unknown or removed id are harmless no-ops.
///
/// # Example
///
/// ```no_run
/// use mixdown::{EngineConfig, MixerEngine, DeviceSink, StreamParams};
///
/// # fn main() -> Result<(), mixdown::EngineError> {
/// let config = EngineConfig::default();
/// let sink_config = config.clone();
/// let engine = MixerEngine::open(config, move || {
///     Ok(Box::new(DeviceSink::new(&sink_config)?))
/// })?;
///
/// let id = engine.add_push_stream(StreamParams::default())?;
/// engine.play(id);
/// // ... write_stream(), pause(), flush(), abort() ...
/// engine.close();
/// # Ok(())
/// # }
/// ```
pub struct MixerEngine {
    shared: Arc<EngineShared>,
    mixer: Option<JoinHandle<()>>,
}

impl MixerEngine {
    /// Opens the engine: validates the configuration, builds the sink and
    /// starts the mixer thread.
    ///
    /// The factory runs on the mixer thread, which is where the sink
    /// lives for its whole life; this is what lets [`DeviceSink`]
    /// (whose cpal stream cannot move between threads) work behind the
    /// plain [`AudioSink`] trait. A sink construction failure is reported
    /// synchronously here.
    ///
    /// [`DeviceSink`]: crate::DeviceSink
    pub fn open<F>(config: EngineConfig, make_sink: F) -> Result<Self, EngineError>
    where
        F: FnOnce() -> Result<Box<dyn AudioSink>, SinkError> + Send + 'static,
    {
        config.validate()?;
        let shared = Arc::new(EngineShared::new(config));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let mixer = std::thread::Builder::new()
            .name("mixdown-mixer".into())
            .spawn(move || {
                let sink = match make_sink() {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                Mixer::new(thread_shared, sink).run();
            })
            .map_err(EngineError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                mixer: Some(mixer),
            }),
            Ok(Err(err)) => {
                let _ = mixer.join();
                Err(EngineError::SinkOpen(err))
            }
            Err(_) => {
                let _ = mixer.join();
                Err(EngineError::MixerUnavailable)
            }
        }
    }

    /// The engine's output format.
    pub fn format(&self) -> AudioFormat {
        self.shared.config.format()
    }

    /// Sets the master volume, clamped to `0..=VOLUME_MAX`.
    pub fn set_master_volume(&self, volume: u32) {
        self.shared
            .master
            .store(volume.min(VOLUME_MAX), Ordering::Relaxed);
    }

    /// The current master volume.
    pub fn master_volume(&self) -> u32 {
        self.shared.master.load(Ordering::Relaxed)
    }

    /// Adds a pull stream: the engine pulls `source` through a resampler
    /// into the stream's cache, continuously in
    /// [`CacheMode::Threaded`](crate::CacheMode::Threaded) or during mixer
    /// reads in [`CacheMode::OnDemand`](crate::CacheMode::OnDemand).
    ///
    /// The stream starts paused; call [`play`](Self::play).
    pub fn add_stream(
        &self,
        params: StreamParams,
        source: SourceFn,
    ) -> Result<StreamId, EngineError> {
        validate_params(&params)?;
        let in_format = AudioFormat::new(params.sample_rate, params.channels);
        let resampler = Arc::new(Mutex::new(LinearResampler::new(
            in_format,
            self.format(),
            Some(source),
        )));

        let pull = Arc::clone(&resampler);
        let cache_source: SourceFn =
            Box::new(move |dst, format| pull.lock().unwrap().read(dst, format));
        let cache = SampleCache::with_source(params.cache_samples, params.mode, cache_source)?;

        Ok(self.insert(cache, resampler, params.cache_samples))
    }

    /// Adds a push stream: the caller feeds it with
    /// [`write_stream`](Self::write_stream), which runs the samples
    /// through a resampler into the stream's cache.
    pub fn add_push_stream(&self, params: StreamParams) -> Result<StreamId, EngineError> {
        validate_params(&params)?;
        let in_format = AudioFormat::new(params.sample_rate, params.channels);
        let resampler = Arc::new(Mutex::new(LinearResampler::new(
            in_format,
            self.format(),
            None,
        )));
        let cache = SampleCache::for_writes(params.cache_samples)?;

        Ok(self.insert(cache, resampler, params.cache_samples))
    }

    fn insert(
        &self,
        cache: SampleCache,
        resampler: Arc<Mutex<LinearResampler>>,
        delay: usize,
    ) -> StreamId {
        let mut table = self.lock_streams();
        let id = StreamId(table.next_id);
        table.next_id += 1;
        table
            .slots
            .push(StreamSlot::new(id, cache, resampler, delay));
        debug!(%id, "stream added");
        id
    }

    /// Starts playback of a stream. Also reopens the cache's input gate,
    /// resuming production after a [`flush`](Self::flush) while paused.
    pub fn play(&self, id: StreamId) {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "play on unknown stream");
            return;
        };
        slot.playing = true;
        if let Some(cache) = slot.cache.as_ref() {
            cache.unlock();
        }
    }

    /// Pauses a stream. Its cache keeps whatever it holds.
    pub fn pause(&self, id: StreamId) {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "pause on unknown stream");
            return;
        };
        slot.playing = false;
    }

    /// Discards everything buffered for a stream (cache and resampler)
    /// and resets its play position to zero.
    ///
    /// Production resumes immediately if the stream is playing. A paused
    /// stream keeps its input gate closed until the next
    /// [`play`](Self::play), so no samples can sneak in while paused.
    pub fn flush(&self, id: StreamId) {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "flush on unknown stream");
            return;
        };
        if let Some(cache) = slot.cache.as_ref() {
            cache.flush();
        }
        if let Some(resampler) = slot.resampler.as_ref() {
            resampler.lock().unwrap().flush();
        }
        if slot.playing {
            if let Some(cache) = slot.cache.as_ref() {
                cache.unlock();
            }
        }
        slot.played = 0;
    }

    /// Pushes samples into a push stream. Returns how many input samples
    /// were accepted; backpressure from the stream's cache shows up as a
    /// short count. Writes to an aborted stream are no-ops.
    pub fn write_stream(&self, id: StreamId, samples: &[Sample], format: AudioFormat) -> usize {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "write to unknown stream");
            return 0;
        };
        if slot.aborted {
            return 0;
        }
        let (Some(resampler), Some(cache)) = (slot.resampler.as_ref(), slot.cache.as_ref())
        else {
            return 0;
        };

        // Alternate between feeding the resampler and moving its output
        // into the cache, so only genuine backpressure (cache full and
        // backlog full) shortens the accepted count.
        let mut resampler = resampler.lock().unwrap();
        let mut block = vec![SILENCE; self.shared.config.mix_block];
        let mut accepted = 0;
        loop {
            let n = resampler.write(&samples[accepted..], format);
            accepted += n;

            loop {
                let room = cache.capacity().saturating_sub(cache.delay());
                if room == 0 {
                    break;
                }
                let want = room.min(block.len());
                let mut out_format = AudioFormat::UNKNOWN;
                let Ok(moved) = resampler.read(&mut block[..want], &mut out_format) else {
                    break;
                };
                if moved == 0 {
                    break;
                }
                cache.write(&block[..moved], out_format);
            }

            if n == 0 || accepted == samples.len() {
                break;
            }
        }
        accepted
    }

    /// Sets a stream's volume, clamped to `0..=VOLUME_MAX`.
    pub fn set_volume(&self, id: StreamId, volume: u32) {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "set_volume on unknown stream");
            return;
        };
        slot.volume = volume.min(VOLUME_MAX);
    }

    /// A stream's volume, or 0 for an unknown id.
    pub fn volume(&self, id: StreamId) -> u32 {
        self.lock_streams().slot(id).map_or(0, |slot| slot.volume)
    }

    /// Resizes a stream's cache. Fails if the new size is smaller than
    /// what the cache currently holds; the stream is unchanged in that
    /// case.
    pub fn set_cache_size(&self, id: StreamId, samples: usize) -> Result<(), EngineError> {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "set_cache_size on unknown stream");
            return Ok(());
        };
        if let Some(cache) = slot.cache.as_ref() {
            cache.set_capacity(samples)?;
            slot.delay = samples;
        }
        Ok(())
    }

    /// A consistent snapshot of a stream's state, or `None` for an
    /// unknown id.
    pub fn status(&self, id: StreamId) -> Option<StreamStatus> {
        let table = self.lock_streams();
        let slot = table.slot(id)?;
        let (buffer, filling, pending) = match slot.cache.as_ref() {
            Some(cache) => {
                let buffer = if slot.delay > 0 && !cache.is_ready() {
                    BufferState::Buffering
                } else {
                    BufferState::Ready
                };
                let filling = if slot.delay > 0 { cache.filling() } else { 100 };
                (buffer, filling, cache.delay())
            }
            None => (BufferState::Ready, 0, 0),
        };
        Some(StreamStatus {
            state: slot.playback_state(),
            played: self.format().duration_for(slot.played),
            buffer,
            filling,
            pending,
        })
    }

    /// Registers a callback for a stream's
    /// [`StreamEvent`](crate::StreamEvent)s.
    pub fn set_event_callback(&self, id: StreamId, callback: EventCallback) {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "set_event_callback on unknown stream");
            return;
        };
        slot.events = Some(callback);
    }

    /// Stops a stream for good: playback pauses, the input gate closes so
    /// no further samples enter, and subsequent writes are no-ops.
    ///
    /// Returns the total play time the stream accounts for, *including*
    /// samples still waiting in its cache and resampler. The stream stays
    /// in the engine until [`remove`](Self::remove); its position can be
    /// carried over to a replacement stream via [`restore`](Self::restore).
    pub fn abort(&self, id: StreamId) -> Duration {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "abort on unknown stream");
            return Duration::ZERO;
        };
        slot.playing = false;
        slot.aborted = true;
        if let Some(cache) = slot.cache.as_ref() {
            cache.lock();
        }
        let mut pending = slot
            .cache
            .as_ref()
            .map_or(0, |cache| cache.delay() as u64);
        if let Some(resampler) = slot.resampler.as_ref() {
            pending += resampler.lock().unwrap().delay() as u64;
        }
        self.format().duration_for(slot.played + pending)
    }

    /// Seeds a stream's play position, typically with the value a
    /// previous [`abort`](Self::abort) returned.
    pub fn restore(&self, id: StreamId, played: Duration) {
        let mut table = self.lock_streams();
        let Some(slot) = table.slot_mut(id) else {
            warn!(%id, "restore on unknown stream");
            return;
        };
        slot.played = self.shared.config.format().samples_for(played);
    }

    /// Removes a stream, tearing down its pipeline. Joins the cache's
    /// producer thread if the stream used one.
    pub fn remove(&self, id: StreamId) {
        let mut table = self.lock_streams();
        let before = table.slots.len();
        table.slots.retain(|slot| slot.id != id);
        if table.slots.len() == before {
            warn!(%id, "remove on unknown stream");
        } else {
            debug!(%id, "stream removed");
        }
    }

    /// Number of streams currently in the engine, ended ones included.
    pub fn stream_count(&self) -> usize {
        self.lock_streams().slots.len()
    }

    /// Stops the mixer, joins it, and frees all streams. Also runs on
    /// drop; prefer calling it explicitly for deterministic shutdown.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(mixer) = self.mixer.take() {
            if mixer.join().is_err() {
                tracing::error!("mixer thread panicked");
            }
        }
        self.lock_streams().slots.clear();
    }

    fn lock_streams(&self) -> MutexGuard<'_, StreamTable> {
        self.shared.streams.lock().unwrap()
    }
}

impl Drop for MixerEngine {
    fn drop(&mut self) {
        if self.mixer.is_some() {
            self.shutdown();
        }
    }
}

fn validate_params(params: &StreamParams) -> Result<(), EngineError> {
    if params.sample_rate == 0 || params.channels == 0 {
        return Err(EngineError::InvalidStream(format!(
            "input format {}Hz/{}ch is not playable",
            params.sample_rate, params.channels
        )));
    }
    Ok(())
}
