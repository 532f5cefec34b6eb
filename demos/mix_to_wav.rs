//! Mixes two streams offline into a WAV file, exercising the resampler
//! with a mono 22.05kHz input.
//!
//! ```sh
//! cargo run --example mix_to_wav
//! ```

use std::time::Duration;

use mixdown::{
    EngineConfig, MixerEngine, SignalGenerator, StreamParams, WavSink, VOLUME_MAX,
};

fn main() -> Result<(), mixdown::EngineError> {
    tracing_subscriber::fmt::init();

    let config = EngineConfig::default();
    let sink = WavSink::create("mix.wav", &config);
    let engine = MixerEngine::open(config, move || Ok(Box::new(sink)))?;

    // One stream at the output format, one that needs resampling.
    let mut tone = SignalGenerator::new(44100, 2);
    tone.push_sine(440.0, 0.8, Duration::from_secs(2));
    let mut rumble = SignalGenerator::new(22050, 1);
    rumble.push_sine(80.0, 0.8, Duration::from_secs(2));

    let a = engine.add_stream(
        StreamParams {
            cache_samples: 8820,
            ..Default::default()
        },
        tone.into_source(2048),
    )?;
    let b = engine.add_stream(
        StreamParams {
            sample_rate: 22050,
            channels: 1,
            cache_samples: 8820,
            ..Default::default()
        },
        rumble.into_source(2048),
    )?;

    engine.set_volume(a, VOLUME_MAX / 2);
    engine.set_volume(b, VOLUME_MAX / 2);
    engine.play(a);
    engine.play(b);

    // Let the signal play out, then a little margin for the tail.
    std::thread::sleep(Duration::from_millis(2300));
    while engine
        .status(a)
        .zip(engine.status(b))
        .is_some_and(|(a, b)| a.pending > 0 || b.pending > 0)
    {
        std::thread::sleep(Duration::from_millis(50));
    }

    engine.close();
    println!("wrote mix.wav");
    Ok(())
}
