//! Playback through the system audio device via cpal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::SinkError;
use crate::sample::{to_f32, Sample};
use crate::sink::AudioSink;

/// Lists the names of available output devices.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(err) => {
            warn!(%err, "failed to enumerate output devices");
            Vec::new()
        }
    }
}

/// An [`AudioSink`] playing through a cpal output stream.
///
/// cpal delivers audio through a callback on its own high-priority
/// thread, while the mixer expects a blocking write. The two meet in a
/// lock-free ring buffer: `write` pushes into it (sleeping briefly while
/// the device catches up), the callback pops from it and pads underruns
/// with silence. The output stream is negotiated as f32; samples are
/// converted in the callback.
///
/// cpal streams cannot move between threads, which is why the engine
/// takes a sink *factory* and builds the sink on the mixer thread.
pub struct DeviceSink {
    name: String,
    device: cpal::Device,
    config: cpal::StreamConfig,
    channels: usize,
    ring_samples: usize,
    producer: HeapProd<Sample>,
    stream: cpal::Stream,
    /// Set by the stream's error callback; checked before each write.
    error_flag: Arc<AtomicBool>,
    write_timeout: Duration,
}

impl DeviceSink {
    /// Opens the default output device at the engine's output format.
    pub fn new(engine: &EngineConfig) -> Result<Self, SinkError> {
        Self::for_device(engine, None)
    }

    /// Opens a specific output device by name, or the default when
    /// `device_name` is `None`. Use [`list_output_devices`] for the
    /// available names.
    pub fn for_device(engine: &EngineConfig, device_name: Option<&str>) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| SinkError::backend(e.to_string()))?
                .find(|d| d.name().ok().as_deref() == Some(name))
                .ok_or(SinkError::NoDevice)?,
            None => host.default_output_device().ok_or(SinkError::NoDevice)?,
        };
        let label = device.name().unwrap_or_else(|_| "unknown".to_string());

        let config = cpal::StreamConfig {
            channels: engine.channels,
            sample_rate: cpal::SampleRate(engine.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Two latency periods of headroom between the mixer and the
        // device callback.
        let latency = engine.effective_latency();
        let ring_samples =
            (engine.format().samples_for(latency) as usize * 2).max(engine.mix_block * 2);
        let (producer, consumer) = HeapRb::<Sample>::new(ring_samples).split();

        let error_flag = Arc::new(AtomicBool::new(false));
        let stream = build_stream(&device, &config, consumer, Arc::clone(&error_flag))?;
        // Some backends start streams eagerly; hold playback until the
        // mixer asks for it.
        let _ = stream.pause();

        debug!(
            device = %label,
            rate = engine.sample_rate,
            channels = engine.channels,
            ring = ring_samples,
            "device sink open"
        );

        Ok(Self {
            name: format!("device:{label}"),
            device,
            config,
            channels: engine.channels as usize,
            ring_samples,
            producer,
            stream,
            error_flag,
            write_timeout: latency,
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<Sample>,
    error_flag: Arc<AtomicBool>,
) -> Result<cpal::Stream, SinkError> {
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for slot in data.iter_mut() {
                    *slot = match consumer.try_pop() {
                        Some(sample) => to_f32(sample),
                        // Underrun: pad with silence rather than stall the
                        // device thread.
                        None => 0.0,
                    };
                }
            },
            move |err| {
                tracing::error!(%err, "output stream error");
                error_flag.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| SinkError::backend(e.to_string()))
}

impl AudioSink for DeviceSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self) -> Result<(), SinkError> {
        self.stream
            .play()
            .map_err(|e| SinkError::backend(e.to_string()))
    }

    fn write(&mut self, block: &[Sample]) -> Result<usize, SinkError> {
        if self.error_flag.swap(false, Ordering::SeqCst) {
            return Err(SinkError::backend("output stream reported an error"));
        }
        let deadline = Instant::now() + self.write_timeout;
        let mut offset = 0;
        while offset < block.len() {
            offset += self.producer.push_slice(&block[offset..]);
            if offset < block.len() {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(offset / self.channels)
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        // Let the callback play out whatever is still queued.
        let deadline = Instant::now() + self.write_timeout * 4;
        while self.producer.occupied_len() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        if let Err(err) = self.stream.pause() {
            warn!(sink = %self.name, %err, "output stream pause not supported");
        }
        Ok(())
    }

    fn recover(&mut self, error: SinkError) -> Result<(), SinkError> {
        warn!(sink = %self.name, %error, "rebuilding output stream");
        let (producer, consumer) = HeapRb::<Sample>::new(self.ring_samples).split();
        let stream = build_stream(
            &self.device,
            &self.config,
            consumer,
            Arc::clone(&self.error_flag),
        )?;
        stream
            .play()
            .map_err(|e| SinkError::backend(e.to_string()))?;
        self.producer = producer;
        self.stream = stream;
        self.error_flag.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stream.pause();
    }
}
