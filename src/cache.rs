//! Bounded sample cache with in-band format tracking.
//!
//! A [`SampleCache`] decouples a sample producer from the mixer across a
//! fixed-capacity buffer. Alongside the samples it carries an ordered run
//! of format markers, so the consumer learns the input format of every
//! batch it drains even when the format changes mid-stream.
//!
//! Production happens in one of two ways:
//! - [`CacheMode::Threaded`]: a dedicated producer thread pulls the source
//!   callback and tops the cache up continuously.
//! - [`CacheMode::OnDemand`]: [`read`](SampleCache::read) itself tops the
//!   cache up from the source after draining.
//!
//! A cache built with [`SampleCache::for_writes`] has no source at all;
//! an external producer pushes samples in via
//! [`write`](SampleCache::write).
//!
//! # Readiness
//!
//! A cache only serves reads once it has filled to capacity, and keeps
//! serving while non-empty. When it runs empty it goes unready and must
//! refill completely before serving again. This hysteresis is what drives
//! the engine's `Buffering`/`Ready` events.
//!
//! # The input gate
//!
//! Transport operations (flush, abort) need a window in which the source
//! callback is guaranteed not to run. [`lock`](SampleCache::lock) closes
//! the gate, waiting out any in-flight callback; [`unlock`](SampleCache::unlock)
//! reopens it. [`flush`](SampleCache::flush) leaves the gate closed so the
//! caller controls exactly when production resumes. Both locks here use
//! parking_lot for fast, non-poisoning behavior on the audio path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{CacheError, SourceError};
use crate::format::AudioFormat;
use crate::sample::{Sample, SILENCE};

/// Samples the producer thread requests from its source per iteration.
const SCRATCH_SAMPLES: usize = 2048;

/// Producer backoff when the scratch is full or the source reports dry.
const PRODUCER_YIELD: Duration = Duration::from_millis(1);

/// An input callback feeding a cache or a resampler.
///
/// Fills the destination with interleaved samples and reports how many it
/// produced. The callback stores the format of the produced samples in its
/// second argument; [`AudioFormat::UNKNOWN`] means "unchanged since the
/// previous call". An error is terminal: the callback is never invoked
/// again.
pub type SourceFn =
    Box<dyn FnMut(&mut [Sample], &mut AudioFormat) -> Result<usize, SourceError> + Send>;

/// How a cache with a source is kept topped up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// `read` pulls from the source after draining, when the gate allows.
    #[default]
    OnDemand,
    /// A dedicated producer thread keeps the cache full.
    Threaded,
}

/// A run of consecutive samples sharing one input format.
#[derive(Debug)]
struct FormatMarker {
    format: AudioFormat,
    run: usize,
}

struct CacheState {
    buf: VecDeque<Sample>,
    capacity: usize,
    ready: bool,
    markers: VecDeque<FormatMarker>,
    /// Tells the producer thread to discard its scratch next iteration.
    flush_pending: bool,
    /// Terminal source failure; remaining samples drain, then reads error.
    failed: Option<SourceError>,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            ready: false,
            markers: VecDeque::new(),
            flush_pending: false,
            failed: None,
        }
    }

    fn room(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Appends up to `room()` samples and keeps the marker run in step.
    fn deposit(&mut self, samples: &[Sample], format: AudioFormat) -> usize {
        let take = samples.len().min(self.room());
        if take == 0 {
            return 0;
        }
        let needs_marker = match self.markers.back() {
            None => true,
            Some(tail) => !format.is_unknown() && format != tail.format,
        };
        if needs_marker {
            self.markers.push_back(FormatMarker { format, run: 0 });
        }
        if let Some(tail) = self.markers.back_mut() {
            tail.run += take;
        }
        self.buf.extend(&samples[..take]);
        if self.buf.len() == self.capacity {
            self.ready = true;
        }
        take
    }

    /// Drains the head of the buffer into `dst`, never crossing a format
    /// boundary, and reports the format of what was produced.
    fn drain_into(&mut self, dst: &mut [Sample], format: &mut AudioFormat) -> usize {
        let mut want = dst.len().min(self.buf.len());
        if want == 0 {
            return 0;
        }
        let mut retire = false;
        if let Some(head) = self.markers.front() {
            *format = head.format;
            if self.markers.len() > 1 && head.run < want {
                want = head.run;
                retire = true;
            }
        }
        for (slot, sample) in dst.iter_mut().zip(self.buf.drain(..want)) {
            *slot = sample;
        }
        if retire {
            self.markers.pop_front();
        } else if let Some(head) = self.markers.front_mut() {
            head.run -= want;
            if head.run == 0 && self.markers.len() > 1 {
                self.markers.pop_front();
            }
        }
        if self.buf.is_empty() {
            self.ready = false;
        }
        want
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.markers.clear();
        self.ready = false;
    }
}

/// Admission state for the source callback. The callback runs while the
/// gate mutex is held, so acquiring the mutex waits out any invocation in
/// flight; `closed` then keeps the producer parked until `unlock`.
struct GateState {
    closed: bool,
    source: Option<SourceFn>,
}

struct CacheShared {
    state: Mutex<CacheState>,
    gate: Mutex<GateState>,
    gate_open: Condvar,
    stop: AtomicBool,
}

/// Bounded producer/consumer sample buffer with format tracking.
///
/// See the [module docs](self) for semantics. All methods take `&self`;
/// internal locking makes the cache safe to share with its producer
/// thread. Lock order is gate before state, and the producer never touches
/// anything beyond these two.
pub struct SampleCache {
    shared: Arc<CacheShared>,
    mode: CacheMode,
    worker: Option<JoinHandle<()>>,
}

impl SampleCache {
    /// Opens a cache fed by `source`.
    ///
    /// `capacity` is in interleaved samples and must be non-zero. In
    /// [`CacheMode::Threaded`] a producer thread is spawned immediately;
    /// it is joined again on [`close`](Self::close) or drop.
    pub fn with_source(
        capacity: usize,
        mode: CacheMode,
        source: SourceFn,
    ) -> Result<Self, CacheError> {
        let mut cache = Self::build(capacity, mode, Some(source))?;
        if mode == CacheMode::Threaded {
            let shared = Arc::clone(&cache.shared);
            let worker = std::thread::Builder::new()
                .name("mixdown-cache".into())
                .spawn(move || producer_loop(&shared))
                .map_err(CacheError::Spawn)?;
            cache.worker = Some(worker);
        }
        Ok(cache)
    }

    /// Opens a cache for an external producer that pushes samples in via
    /// [`write`](Self::write). It has no source and never tops itself up.
    pub fn for_writes(capacity: usize) -> Result<Self, CacheError> {
        Self::build(capacity, CacheMode::OnDemand, None)
    }

    fn build(
        capacity: usize,
        mode: CacheMode,
        source: Option<SourceFn>,
    ) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        Ok(Self {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheState::new(capacity)),
                gate: Mutex::new(GateState {
                    closed: false,
                    source,
                }),
                gate_open: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
            mode,
            worker: None,
        })
    }

    /// Returns `true` once the cache has filled to capacity and still
    /// holds samples.
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().ready
    }

    /// Fill level as a percentage: 100 while ready, otherwise
    /// `fill · 100 / capacity`.
    pub fn filling(&self) -> u8 {
        let st = self.shared.state.lock();
        if st.ready {
            100
        } else {
            (st.buf.len() * 100 / st.capacity) as u8
        }
    }

    /// Interleaved samples currently buffered.
    pub fn delay(&self) -> usize {
        self.shared.state.lock().buf.len()
    }

    /// Current capacity in interleaved samples.
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity
    }

    /// Drains up to `dst.len()` samples and reports their format.
    ///
    /// Returns 0 while the cache is below ready; the consumer polls. A
    /// single call never spans a format boundary: if the run at the head
    /// is shorter than the request, the read is cut at the boundary and
    /// the next call picks up the following format.
    ///
    /// In on-demand mode the cache then tops itself up from the source,
    /// provided the gate can be acquired without blocking. Once the source
    /// has reported a terminal failure the cache serves out whatever it
    /// still holds and errors when empty.
    pub fn read(&self, dst: &mut [Sample], format: &mut AudioFormat) -> Result<usize, SourceError> {
        let produced = {
            let mut st = self.shared.state.lock();
            if let Some(err) = &st.failed {
                if st.buf.is_empty() {
                    return Err(err.clone());
                }
                st.drain_into(dst, format)
            } else if st.ready {
                st.drain_into(dst, format)
            } else {
                0
            }
        };

        if self.mode == CacheMode::OnDemand {
            if let Err(err) = self.top_up() {
                let st = self.shared.state.lock();
                if produced == 0 && st.buf.is_empty() {
                    return Err(err);
                }
            }
        }
        Ok(produced)
    }

    /// Pulls one batch from the source into the buffer. Skips silently if
    /// the gate is closed or contended; records a terminal failure.
    fn top_up(&self) -> Result<(), SourceError> {
        let Some(mut gate) = self.shared.gate.try_lock() else {
            return Ok(());
        };
        if gate.closed {
            return Ok(());
        }
        let room = {
            let st = self.shared.state.lock();
            if st.failed.is_some() {
                return Ok(());
            }
            st.room()
        };
        if room == 0 {
            return Ok(());
        }
        let Some(source) = gate.source.as_mut() else {
            return Ok(());
        };
        let mut scratch = vec![SILENCE; room];
        let mut reported = AudioFormat::UNKNOWN;
        match source(&mut scratch, &mut reported) {
            Ok(n) => {
                let n = n.min(scratch.len());
                let mut st = self.shared.state.lock();
                st.deposit(&scratch[..n], reported);
                Ok(())
            }
            Err(err) => {
                self.shared.state.lock().failed = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Pushes samples from an external producer. Returns how many were
    /// accepted; the rest did not fit.
    pub fn write(&self, samples: &[Sample], format: AudioFormat) -> usize {
        if self.shared.stop.load(Ordering::Acquire) {
            return 0;
        }
        self.shared.state.lock().deposit(samples, format)
    }

    /// Empties the cache: fill and markers are discarded, readiness is
    /// reset, and a threaded producer drops its scratch at its next
    /// iteration.
    ///
    /// The gate is left closed, giving the caller a quiet window to reset
    /// downstream filters; call [`unlock`](Self::unlock) to resume
    /// production.
    pub fn flush(&self) {
        let mut gate = self.shared.gate.lock();
        gate.closed = true;
        let mut st = self.shared.state.lock();
        st.clear();
        if self.worker.is_some() {
            st.flush_pending = true;
        }
    }

    /// Closes the gate, waiting out any in-flight source callback. No
    /// callback runs again until [`unlock`](Self::unlock).
    pub fn lock(&self) {
        self.shared.gate.lock().closed = true;
    }

    /// Reopens the gate and wakes a parked producer. Harmless if the gate
    /// is already open.
    pub fn unlock(&self) {
        let mut gate = self.shared.gate.lock();
        gate.closed = false;
        self.shared.gate_open.notify_all();
    }

    /// Changes the capacity. Fails if the new capacity is smaller than the
    /// current fill.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        let mut st = self.shared.state.lock();
        if capacity < st.buf.len() {
            return Err(CacheError::CapacityBelowFill {
                requested: capacity,
                fill: st.buf.len(),
            });
        }
        st.capacity = capacity;
        if st.buf.len() == capacity {
            st.ready = true;
        }
        Ok(())
    }

    /// Stops and joins the producer thread, if any. Called automatically
    /// on drop; calling it twice is harmless.
    pub fn close(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let mut gate = self.shared.gate.lock();
            gate.closed = false;
            self.shared.gate_open.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("cache producer thread panicked");
            }
        }
    }

    #[cfg(test)]
    fn marker_runs(&self) -> Vec<usize> {
        self.shared
            .state
            .lock()
            .markers
            .iter()
            .map(|m| m.run)
            .collect()
    }
}

impl Drop for SampleCache {
    fn drop(&mut self) {
        self.close();
    }
}

/// The threaded-mode producer loop.
///
/// Each iteration enters the gate (parking while it is closed), tops a
/// persistent scratch up from the source, then moves what fits into the
/// buffer under the state lock. Leftover scratch carries to the next
/// iteration; a flush discards it. The loop exits on stop or on a
/// terminal source failure.
fn producer_loop(shared: &CacheShared) {
    let mut scratch = vec![SILENCE; SCRATCH_SAMPLES];
    let mut len = 0usize;
    let mut format = AudioFormat::UNKNOWN;

    while !shared.stop.load(Ordering::Acquire) {
        let mut dry = false;
        {
            let mut gate = shared.gate.lock();
            while gate.closed && !shared.stop.load(Ordering::Acquire) {
                shared.gate_open.wait(&mut gate);
            }
            if shared.stop.load(Ordering::Acquire) {
                return;
            }

            let flushed = {
                let mut st = shared.state.lock();
                std::mem::take(&mut st.flush_pending)
            };
            if flushed {
                len = 0;
            }

            if len < scratch.len() {
                let Some(source) = gate.source.as_mut() else {
                    return;
                };
                match source(&mut scratch[len..], &mut format) {
                    Ok(n) => {
                        len += n.min(scratch.len() - len);
                        dry = n == 0;
                    }
                    Err(err) => {
                        tracing::debug!(%err, "cache source reported terminal failure");
                        shared.state.lock().failed = Some(err);
                        return;
                    }
                }
            }

            let deposited = {
                let mut st = shared.state.lock();
                st.deposit(&scratch[..len], format)
            };
            if deposited > 0 {
                scratch.copy_within(deposited..len, 0);
                len -= deposited;
            }
        }
        if len >= scratch.len() || dry {
            std::thread::sleep(PRODUCER_YIELD);
        }
    }
}
