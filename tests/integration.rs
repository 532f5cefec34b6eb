//! Integration tests for mixdown.
//!
//! Everything runs against an in-memory collecting sink, so no audio
//! hardware is required. Timing-sensitive checks poll with generous
//! deadlines instead of assuming a scheduler.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mixdown::{
    event_callback, from_normalized, to_f32, AudioFormat, AudioSink, CacheMode, EngineConfig,
    MixerEngine, PlaybackState, Sample, SignalGenerator, SinkError, SourceFn, StreamEvent,
    StreamParams,
};

/// A sink that captures every sample, paced like a fast device so the
/// mixer does not spin.
struct CollectingSink {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl AudioSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    fn prepare(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn write(&mut self, block: &[Sample]) -> Result<usize, SinkError> {
        self.samples.lock().unwrap().extend_from_slice(block);
        std::thread::sleep(Duration::from_millis(1));
        Ok(block.len() / 2)
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

fn collecting_engine() -> (MixerEngine, Arc<Mutex<Vec<Sample>>>) {
    let samples: Arc<Mutex<Vec<Sample>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_samples = Arc::clone(&samples);
    let config = EngineConfig {
        latency: Duration::from_millis(10),
        mix_block: 512,
        ..Default::default()
    };
    let engine = MixerEngine::open(config, move || {
        Ok(Box::new(CollectingSink {
            samples: sink_samples,
        }))
    })
    .expect("engine opens");
    (engine, samples)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// A test pattern of distinct, headroom-safe values.
fn pattern(len: usize) -> Vec<Sample> {
    (0..len)
        .map(|i| from_normalized(f64::from((i % 200) as i32 - 100) / 200.0))
        .collect()
}

fn ordered_delivery(mode: CacheMode) {
    let (engine, collected) = collecting_engine();
    let input = pattern(4096);

    let mut signal = SignalGenerator::new(44100, 2);
    signal.push_samples(&input);
    let id = engine
        .add_stream(
            StreamParams {
                cache_samples: 2048,
                mode,
                ..Default::default()
            },
            signal.into_source(1024),
        )
        .unwrap();
    engine.play(id);

    assert!(
        wait_until(Duration::from_secs(5), || {
            collected.lock().unwrap().len() >= input.len()
        }),
        "sink never received the full signal"
    );

    // Samples reach the sink exactly as produced, in order, before any
    // trailing silence.
    let collected = collected.lock().unwrap();
    assert_eq!(&collected[..input.len()], &input[..]);
    engine.close();
}

#[test]
fn test_on_demand_stream_delivers_in_order() {
    ordered_delivery(CacheMode::OnDemand);
}

#[test]
fn test_threaded_stream_delivers_in_order() {
    ordered_delivery(CacheMode::Threaded);
}

#[test]
fn test_two_streams_sum() {
    let (engine, collected) = collecting_engine();

    let params = StreamParams {
        cache_samples: 1024,
        ..Default::default()
    };
    let a = engine.add_push_stream(params.clone()).unwrap();
    let b = engine.add_push_stream(params).unwrap();

    // Fill both caches while paused so the overlap is maximal.
    let format = engine.format();
    engine.write_stream(a, &vec![from_normalized(0.2); 1024], format);
    engine.write_stream(b, &vec![from_normalized(0.3); 1024], format);
    engine.play(a);
    engine.play(b);

    assert!(wait_until(Duration::from_secs(5), || {
        let status_a = engine.status(a).unwrap();
        let status_b = engine.status(b).unwrap();
        status_a.pending == 0 && status_b.pending == 0
    }));

    let collected = collected.lock().unwrap();
    let values: Vec<f32> = collected.iter().map(|&s| to_f32(s)).collect();
    assert!(
        values.iter().any(|&v| (v - 0.5).abs() < 1e-3),
        "no summed samples observed"
    );
    assert!(
        values.iter().all(|&v| v < 0.5 + 1e-3),
        "sum exceeded the two contributions"
    );
    engine.close();
}

#[test]
fn test_flush_during_play_resets_position() {
    let (engine, _collected) = collecting_engine();

    // An endless source: the stream plays until we interfere.
    let source: SourceFn = Box::new(|dst, format| {
        *format = AudioFormat::new(44100, 2);
        for slot in dst.iter_mut() {
            *slot = from_normalized(0.1);
        }
        Ok(dst.len())
    });
    let id = engine
        .add_stream(
            StreamParams {
                cache_samples: 2048,
                ..Default::default()
            },
            source,
        )
        .unwrap();
    engine.play(id);

    assert!(wait_until(Duration::from_secs(5), || {
        engine.status(id).unwrap().played >= Duration::from_millis(100)
    }));

    engine.flush(id);
    let played = engine.status(id).unwrap().played;
    assert!(
        played < Duration::from_millis(50),
        "flush did not reset the position (played = {played:?})"
    );

    // Still playing: production resumes and the position grows again.
    assert!(wait_until(Duration::from_secs(5), || {
        engine.status(id).unwrap().played > Duration::ZERO
    }));
    engine.close();
}

#[test]
fn test_pause_holds_position() {
    let (engine, _collected) = collecting_engine();
    let source: SourceFn = Box::new(|dst, format| {
        *format = AudioFormat::new(44100, 2);
        for slot in dst.iter_mut() {
            *slot = from_normalized(0.1);
        }
        Ok(dst.len())
    });
    let id = engine
        .add_stream(
            StreamParams {
                cache_samples: 2048,
                ..Default::default()
            },
            source,
        )
        .unwrap();
    engine.play(id);

    assert!(wait_until(Duration::from_secs(5), || {
        engine.status(id).unwrap().played > Duration::ZERO
    }));

    engine.pause(id);
    let frozen = engine.status(id).unwrap().played;
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.status(id).unwrap().played, frozen);
    assert_eq!(engine.status(id).unwrap().state, PlaybackState::Paused);
    engine.close();
}

#[test]
fn test_finite_stream_ends_with_event() {
    let (engine, collected) = collecting_engine();
    let input = pattern(2048);

    let mut signal = SignalGenerator::new(44100, 2);
    signal.push_samples(&input);
    let id = engine
        .add_stream(
            StreamParams {
                cache_samples: 1024,
                ..Default::default()
            },
            signal.into_finite_source(1024),
        )
        .unwrap();

    let events: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    engine.set_event_callback(
        id,
        event_callback(move |event| events_clone.lock().unwrap().push(event)),
    );
    engine.play(id);

    assert!(
        wait_until(Duration::from_secs(5), || {
            events.lock().unwrap().contains(&StreamEvent::Ended)
        }),
        "stream never ended"
    );
    assert_eq!(engine.status(id).unwrap().state, PlaybackState::Ended);

    // Every sample made it out before the stream ended.
    let collected = collected.lock().unwrap();
    assert_eq!(&collected[..input.len()], &input[..]);

    engine.remove(id);
    assert_eq!(engine.stream_count(), 0);
    engine.close();
}

#[test]
fn test_push_stream_resampled_end_to_end() {
    let (engine, collected) = collecting_engine();

    // One second of mono at half the output rate, streamed in against
    // cache backpressure the way a live producer would push it.
    let format = AudioFormat::new(22050, 1);
    let id = engine
        .add_push_stream(StreamParams {
            sample_rate: 22050,
            channels: 1,
            cache_samples: 8820,
            ..Default::default()
        })
        .unwrap();
    engine.play(id);

    let input = vec![from_normalized(0.25); 22050];
    let mut written = 0;
    assert!(wait_until(Duration::from_secs(10), || {
        written += engine.write_stream(id, &input[written..], format);
        written == input.len()
    }));

    // Empty writes nudge the resampler's remaining backlog into the
    // cache while the mixer drains it.
    assert!(wait_until(Duration::from_secs(10), || {
        engine.write_stream(id, &[], format);
        let status = engine.status(id).unwrap();
        status.pending == 0 && status.played >= Duration::from_millis(995)
    }));

    // Upsampled to stereo 44.1kHz this is a second of audio, give or
    // take the final interpolation frame.
    let played = engine.status(id).unwrap().played;
    assert!(
        played >= Duration::from_millis(995) && played <= Duration::from_millis(1000),
        "unexpected play time {played:?}"
    );

    let collected = collected.lock().unwrap();
    let value = to_f32(collected[100]);
    assert!((value - 0.25).abs() < 1e-3, "unexpected sample {value}");
    engine.close();
}

#[test]
fn test_buffering_events_end_to_end() {
    let (engine, _collected) = collecting_engine();

    // A faucet source the test can open and close.
    let budget = Arc::new(Mutex::new(0usize));
    let source_budget = Arc::clone(&budget);
    let source: SourceFn = Box::new(move |dst, format| {
        *format = AudioFormat::new(44100, 2);
        let mut budget = source_budget.lock().unwrap();
        let n = dst.len().min(*budget);
        *budget -= n;
        for slot in dst[..n].iter_mut() {
            *slot = from_normalized(0.1);
        }
        Ok(n)
    });

    let id = engine
        .add_stream(
            StreamParams {
                cache_samples: 1024,
                ..Default::default()
            },
            source,
        )
        .unwrap();
    let events: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    engine.set_event_callback(
        id,
        event_callback(move |event| events_clone.lock().unwrap().push(event)),
    );
    engine.play(id);

    // Dry source: the stream reports buffering.
    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().first() == Some(&StreamEvent::Buffering)
    }));

    // Open the faucet: the cache fills and the stream comes ready.
    *budget.lock().unwrap() = 1024;
    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().contains(&StreamEvent::Ready)
    }));

    // Close it again: the cache drains and buffering returns.
    assert!(wait_until(Duration::from_secs(5), || {
        let events = events.lock().unwrap();
        events
            .iter()
            .filter(|&&e| e == StreamEvent::Buffering)
            .count()
            >= 2
    }));
    engine.close();
}
