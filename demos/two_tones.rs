//! Plays two sine tones mixed together on the default output device.
//!
//! ```sh
//! cargo run --example two_tones
//! ```

use std::time::Duration;

use mixdown::{
    DeviceSink, EngineConfig, MixerEngine, SignalGenerator, StreamParams, VOLUME_MAX,
};

fn main() -> Result<(), mixdown::EngineError> {
    tracing_subscriber::fmt::init();

    let config = EngineConfig::default();
    let sink_config = config.clone();
    let engine = MixerEngine::open(config, move || {
        Ok(Box::new(DeviceSink::new(&sink_config)?))
    })?;

    let mut low = SignalGenerator::new(44100, 2);
    low.push_sine(220.0, 0.8, Duration::from_secs(3));
    let mut high = SignalGenerator::new(44100, 2);
    high.push_sine(330.0, 0.8, Duration::from_secs(3));

    let params = StreamParams {
        cache_samples: 8820, // 100ms of interleaved stereo
        ..Default::default()
    };
    let a = engine.add_stream(params.clone(), low.into_source(2048))?;
    let b = engine.add_stream(params, high.into_source(2048))?;

    // Headroom so the sum cannot clip.
    engine.set_volume(a, VOLUME_MAX / 2);
    engine.set_volume(b, VOLUME_MAX / 2);

    engine.play(a);
    engine.play(b);
    println!("playing a fifth for 3 seconds...");
    std::thread::sleep(Duration::from_secs(4));

    engine.close();
    Ok(())
}
