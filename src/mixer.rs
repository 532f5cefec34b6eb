//! The mixer: single consumer driving the sink.
//!
//! One mixer thread per engine. Each pass pulls up to one mix block from
//! every active stream, applies per-stream gain, sums with saturation,
//! applies master gain, and hands the block to the sink. Around that sits
//! a small state machine keeping the sink stopped while there is nothing
//! to play and draining it after a run of silence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::engine::{EngineShared, StreamTable};
use crate::event::{EventCallback, StreamEvent};
use crate::format::AudioFormat;
use crate::sample::{saturating_mix, scale_volume, Sample, SILENCE, VOLUME_MAX};
use crate::sink::AudioSink;

/// The mixer loop state, owned by the mixer thread.
pub(crate) struct Mixer {
    shared: Arc<EngineShared>,
    sink: Box<dyn AudioSink>,
    in_buf: Vec<Sample>,
    out_buf: Vec<Sample>,
    /// Events collected during a pass, emitted after the engine lock is
    /// released so callbacks may call back into the engine.
    events: Vec<(EventCallback, StreamEvent)>,
}

impl Mixer {
    pub(crate) fn new(shared: Arc<EngineShared>, sink: Box<dyn AudioSink>) -> Self {
        let block = shared.config.mix_block;
        Self {
            shared,
            sink,
            in_buf: vec![SILENCE; block],
            out_buf: vec![SILENCE; block],
            events: Vec::new(),
        }
    }

    /// Runs until the engine stops or the sink fails beyond recovery.
    pub(crate) fn run(mut self) {
        let channels = self.shared.config.channels as usize;
        let latency = self.shared.config.effective_latency();
        let max_silence = self.shared.config.max_silence;
        let mut stopped = true;
        let mut idle_since: Option<Instant> = None;

        debug!(
            format = %self.shared.config.format(),
            sink = self.sink.name(),
            "mixer running"
        );

        while !self.shared.stop.load(Ordering::Acquire) {
            let mixed = self.mix_pass();
            let mut frames = mixed / channels;

            if frames == 0 {
                if stopped {
                    std::thread::sleep(latency);
                    continue;
                }
                let idle = idle_since.get_or_insert_with(Instant::now);
                if idle.elapsed() > max_silence {
                    debug!(sink = self.sink.name(), "silence limit reached, draining sink");
                    if let Err(err) = self.sink.drain() {
                        warn!(sink = self.sink.name(), %err, "sink drain failed");
                    }
                    stopped = true;
                    idle_since = None;
                    continue;
                }
                self.out_buf.fill(SILENCE);
                frames = self.out_buf.len() / channels;
            } else {
                idle_since = None;
                if stopped {
                    if let Err(err) = self.sink.prepare() {
                        error!(sink = self.sink.name(), %err, "sink failed to start");
                        break;
                    }
                    stopped = false;
                }
            }

            if !self.write_block(frames * channels) {
                break;
            }
        }

        self.sink.close();
        debug!(sink = self.sink.name(), "mixer exited");
    }

    /// One mixing pass. Returns the interleaved sample count of the
    /// produced block.
    fn mix_pass(&mut self) -> usize {
        let master = self.shared.master.load(Ordering::Relaxed);
        let mixed = {
            let mut table = self.shared.streams.lock().unwrap();
            mix_streams(
                &mut table,
                &mut self.in_buf,
                &mut self.out_buf,
                master,
                &mut self.events,
            )
        };
        for (callback, event) in self.events.drain(..) {
            callback(event);
        }
        mixed
    }

    /// Writes a block, giving the sink one recovery attempt on failure.
    /// Returns `false` when the mixer should exit.
    fn write_block(&mut self, samples: usize) -> bool {
        let channels = self.shared.config.channels as usize;
        let frames = samples / channels;
        match self.sink.write(&self.out_buf[..samples]) {
            Ok(written) => {
                if written < frames {
                    warn!(
                        sink = self.sink.name(),
                        expected = frames,
                        written,
                        "short write to sink"
                    );
                }
                true
            }
            Err(err) => {
                warn!(sink = self.sink.name(), %err, "sink write failed, recovering");
                match self.sink.recover(err) {
                    Ok(()) => match self.sink.write(&self.out_buf[..samples]) {
                        Ok(_) => true,
                        Err(err) => {
                            error!(sink = self.sink.name(), %err, "sink write failed after recovery");
                            false
                        }
                    },
                    Err(err) => {
                        error!(sink = self.sink.name(), %err, "sink recovery failed");
                        false
                    }
                }
            }
        }
    }
}

/// Reads every active stream once, sums the volume-scaled contributions
/// into `out_buf`, and returns the block length in interleaved samples:
/// the maximum over all contributing streams.
///
/// Lifecycle edges surface here: a terminal source tears the stream's
/// pipeline down and queues `Ended`; an empty cache on a buffered stream
/// queues `Buffering` once; the first samples after that queue `Ready`.
pub(crate) fn mix_streams(
    table: &mut StreamTable,
    in_buf: &mut [Sample],
    out_buf: &mut [Sample],
    master: u32,
    events: &mut Vec<(EventCallback, StreamEvent)>,
) -> usize {
    out_buf.fill(SILENCE);
    let mut out_len = 0;

    for slot in table.slots.iter_mut() {
        if !slot.playing || slot.ended {
            continue;
        }
        let Some(cache) = slot.cache.as_ref() else {
            continue;
        };
        let mut format = AudioFormat::UNKNOWN;
        match cache.read(in_buf, &mut format) {
            Err(err) => {
                debug!(stream = %slot.id, %err, "stream ended");
                slot.ended = true;
                slot.cache = None;
                slot.resampler = None;
                if let Some(callback) = &slot.events {
                    events.push((Arc::clone(callback), StreamEvent::Ended));
                }
            }
            Ok(0) => {
                if slot.delay > 0 && !slot.buffering {
                    slot.buffering = true;
                    if let Some(callback) = &slot.events {
                        events.push((Arc::clone(callback), StreamEvent::Buffering));
                    }
                }
            }
            Ok(n) => {
                if slot.delay > 0 && slot.buffering {
                    slot.buffering = false;
                    if let Some(callback) = &slot.events {
                        events.push((Arc::clone(callback), StreamEvent::Ready));
                    }
                }
                slot.played += n as u64;
                let volume = slot.volume;
                for (out, &sample) in out_buf[..n].iter_mut().zip(in_buf[..n].iter()) {
                    *out = saturating_mix(*out, scale_volume(sample, volume));
                }
                out_len = out_len.max(n);
            }
        }
    }

    if master != VOLUME_MAX {
        for out in out_buf[..out_len].iter_mut() {
            *out = scale_volume(*out, master);
        }
    }
    out_len
}
