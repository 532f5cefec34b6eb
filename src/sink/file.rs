//! WAV file sink.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::SinkError;
use crate::sample::Sample;
use crate::sink::AudioSink;

/// PCM in the integer build, IEEE float in the `float-samples` build.
#[cfg(not(feature = "float-samples"))]
const WAV_FORMAT_TAG: u16 = 1;
#[cfg(feature = "float-samples")]
const WAV_FORMAT_TAG: u16 = 3;

const BYTES_PER_SAMPLE: u32 = 4;

/// An [`AudioSink`] that writes the mixed output to a 32-bit WAV file.
///
/// The file is created on `prepare` and its header is finalized (sizes
/// patched) on `close`. Handy for rendering a mix and for inspecting
/// what the engine actually produced.
///
/// Writes are paced to real time: the mixer's own throttle is the sink
/// blocking for one period, so a sink that accepted blocks instantly
/// would have the mixer spinning and padding the file with silence.
///
/// # Example
///
/// ```no_run
/// use mixdown::{EngineConfig, WavSink};
///
/// let config = EngineConfig::default();
/// let sink = WavSink::create("mix.wav", &config);
/// // Hand it to MixerEngine::open(...)
/// # let _ = sink;
/// ```
pub struct WavSink {
    name: String,
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    writer: Option<BufWriter<File>>,
    samples_written: u64,
}

impl WavSink {
    /// Creates a sink that will write to `path` at the engine's output
    /// format. The file itself is not touched until `prepare`.
    pub fn create(path: impl AsRef<Path>, config: &EngineConfig) -> Self {
        Self {
            name: format!("wav:{}", path.as_ref().display()),
            path: path.as_ref().to_path_buf(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            writer: None,
            samples_written: 0,
        }
    }

    fn write_header(&self, writer: &mut BufWriter<File>, data_size: u32) -> std::io::Result<()> {
        // RIFF header
        writer.write_all(b"RIFF")?;
        writer.write_all(&(36 + data_size).to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        // fmt chunk
        writer.write_all(b"fmt ")?;
        writer.write_all(&16u32.to_le_bytes())?;
        writer.write_all(&WAV_FORMAT_TAG.to_le_bytes())?;
        writer.write_all(&self.channels.to_le_bytes())?;
        writer.write_all(&self.sample_rate.to_le_bytes())?;
        let byte_rate = self.sample_rate * u32::from(self.channels) * BYTES_PER_SAMPLE;
        writer.write_all(&byte_rate.to_le_bytes())?;
        let block_align = self.channels * BYTES_PER_SAMPLE as u16;
        writer.write_all(&block_align.to_le_bytes())?;
        writer.write_all(&(BYTES_PER_SAMPLE as u16 * 8).to_le_bytes())?;

        // data chunk header
        writer.write_all(b"data")?;
        writer.write_all(&data_size.to_le_bytes())?;

        Ok(())
    }

    fn patch_header(writer: &mut BufWriter<File>, data_size: u32) -> std::io::Result<()> {
        writer.seek(SeekFrom::Start(4))?;
        writer.write_all(&(36 + data_size).to_le_bytes())?;
        writer.seek(SeekFrom::Start(40))?;
        writer.write_all(&data_size.to_le_bytes())?;
        writer.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

impl AudioSink for WavSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self) -> Result<(), SinkError> {
        if self.writer.is_some() {
            return Ok(());
        }
        let file = File::create(&self.path).map_err(|e| SinkError::file(&self.path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_header(&mut writer, 0)
            .map_err(|e| SinkError::file(&self.path, e))?;
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, block: &[Sample]) -> Result<usize, SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::NotPrepared)?;
        for &sample in block {
            writer
                .write_all(&sample.to_le_bytes())
                .map_err(|e| SinkError::file(&self.path, e))?;
        }
        self.samples_written += block.len() as u64;

        let frames = block.len() / self.channels as usize;
        std::thread::sleep(std::time::Duration::from_secs_f64(
            frames as f64 / f64::from(self.sample_rate),
        ));
        Ok(frames)
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| SinkError::file(&self.path, e))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let data_size = (self.samples_written * u64::from(BYTES_PER_SAMPLE)) as u32;
            if let Err(err) = Self::patch_header(&mut writer, data_size) {
                tracing::warn!(sink = %self.name, %err, "failed to finalize WAV header");
            }
            if let Err(err) = writer.flush() {
                tracing::warn!(sink = %self.name, %err, "failed to flush WAV file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_write_before_prepare_fails() {
        let dir = tempdir().unwrap();
        let mut sink = WavSink::create(dir.path().join("out.wav"), &test_config());
        let block = vec![crate::sample::SILENCE; 8];
        assert!(matches!(sink.write(&block), Err(SinkError::NotPrepared)));
    }

    #[test]
    fn test_header_and_samples_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = WavSink::create(&path, &test_config());

        sink.prepare().unwrap();
        let block: Vec<Sample> = (0..64).map(|i| (i * 1000) as Sample).collect();
        assert_eq!(sink.write(&block).unwrap(), 32);
        sink.close();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44 + 64 * 4);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // data chunk size was patched on close
        assert_eq!(
            u32::from_le_bytes(bytes[40..44].try_into().unwrap()),
            64 * 4
        );
        // first sample round-trips
        assert_eq!(&bytes[44..48], &(0 as Sample).to_le_bytes());
        assert_eq!(&bytes[48..52], &(1000 as Sample).to_le_bytes());
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut sink = WavSink::create(dir.path().join("out.wav"), &test_config());
        sink.prepare().unwrap();
        sink.prepare().unwrap();
        let block = vec![crate::sample::SILENCE; 4];
        assert_eq!(sink.write(&block).unwrap(), 2);
    }
}
