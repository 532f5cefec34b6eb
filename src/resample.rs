//! Sample rate and channel conversion.
//!
//! [`LinearResampler`] sits between an input source and a stream's cache,
//! converting arbitrary input formats to the engine's output format. It
//! mixes channels first (fewer samples to resample), then rate-converts
//! with linear interpolation, which is fast and adequate for playback;
//! swap in a dedicated resampling crate behind the same interface if
//! higher quality is needed.
//!
//! The resampler serves both stream construction paths:
//! - *Pull*: built with a source callback; [`read`](LinearResampler::read)
//!   pulls, converts and returns output-format samples.
//! - *Push*: built without a source; [`write`](LinearResampler::write)
//!   accepts input-format samples into a bounded backlog that `read`
//!   drains.

use std::collections::VecDeque;

use crate::cache::SourceFn;
use crate::error::SourceError;
use crate::format::AudioFormat;
use crate::sample::{Sample, SILENCE};

/// Input samples requested from the source per pull.
const PULL_SCRATCH: usize = 2048;

/// Soft bound on converted output buffered by the push path.
const PENDING_LIMIT: usize = 16384;

/// Converts interleaved samples between two fixed formats.
///
/// Rates and channel counts must be non-zero; the engine validates stream
/// parameters before constructing one. Interpolation state carries across
/// calls, so consecutive blocks splice without discontinuities.
pub struct LinearResampler {
    in_format: AudioFormat,
    out_format: AudioFormat,
    source: Option<SourceFn>,
    failed: Option<SourceError>,
    /// Converted output awaiting the consumer.
    pending: VecDeque<Sample>,
    /// Last input frame (channel-mixed), for interpolation continuity.
    prev: Option<Vec<f64>>,
    /// Fractional read position relative to `prev`.
    pos: f64,
}

impl LinearResampler {
    /// Creates a resampler converting `in_format` to `out_format`,
    /// optionally pulling from `source`.
    pub fn new(in_format: AudioFormat, out_format: AudioFormat, source: Option<SourceFn>) -> Self {
        Self {
            in_format,
            out_format,
            source,
            failed: None,
            pending: VecDeque::new(),
            prev: None,
            pos: 0.0,
        }
    }

    /// The format this resampler currently accepts.
    pub fn in_format(&self) -> AudioFormat {
        self.in_format
    }

    /// The format this resampler produces.
    pub fn out_format(&self) -> AudioFormat {
        self.out_format
    }

    /// Returns `true` if no conversion is needed.
    pub fn is_passthrough(&self) -> bool {
        self.in_format == self.out_format
    }

    /// Produces up to `dst.len()` output-format samples, pulling from the
    /// source as needed. Reports the output format and the produced count;
    /// zero means the source is dry. A terminal source failure surfaces
    /// once the backlog is fully drained.
    pub fn read(&mut self, dst: &mut [Sample], format: &mut AudioFormat) -> Result<usize, SourceError> {
        *format = self.out_format;
        while self.pending.len() < dst.len() && self.failed.is_none() {
            let Some(source) = self.source.as_mut() else {
                break;
            };
            let mut raw = vec![SILENCE; PULL_SCRATCH];
            let mut reported = AudioFormat::UNKNOWN;
            match source(&mut raw, &mut reported) {
                Ok(0) => break,
                Ok(n) => {
                    let n = n.min(raw.len());
                    if !reported.is_unknown() && reported != self.in_format {
                        self.reconfigure(reported);
                    }
                    self.convert(&raw[..n]);
                }
                Err(err) => self.failed = Some(err),
            }
        }
        if self.pending.is_empty() {
            if let Some(err) = &self.failed {
                return Err(err.clone());
            }
        }
        let take = dst.len().min(self.pending.len());
        for (slot, sample) in dst.iter_mut().zip(self.pending.drain(..take)) {
            *slot = sample;
        }
        Ok(take)
    }

    /// Accepts input-format samples into the backlog, converting them.
    /// Returns how many input samples were accepted; the backlog bound
    /// provides backpressure to the caller.
    pub fn write(&mut self, src: &[Sample], format: AudioFormat) -> usize {
        if !format.is_unknown() && format != self.in_format {
            self.reconfigure(format);
        }
        let in_ch = self.in_format.channels.max(1) as usize;
        let out_ch = self.out_format.channels.max(1) as usize;
        let room = PENDING_LIMIT.saturating_sub(self.pending.len());
        if room < out_ch {
            return 0;
        }
        // Accept as many whole input frames as the backlog can absorb
        // after conversion, always at least one to guarantee progress.
        let ratio = f64::from(self.out_format.sample_rate) / f64::from(self.in_format.sample_rate);
        let max_frames = (((room / out_ch) as f64 / ratio) as usize).max(1);
        let frames = (src.len() / in_ch).min(max_frames);
        if frames == 0 {
            return 0;
        }
        let accept = frames * in_ch;
        self.convert(&src[..accept]);
        accept
    }

    /// Discards the backlog and interpolation carry.
    pub fn flush(&mut self) {
        self.pending.clear();
        self.prev = None;
        self.pos = 0.0;
    }

    /// Converted samples buffered but not yet read.
    pub fn delay(&self) -> usize {
        self.pending.len()
    }

    fn reconfigure(&mut self, format: AudioFormat) {
        if format.sample_rate == 0 || format.channels == 0 {
            return;
        }
        tracing::debug!(from = %self.in_format, to = %format, "resampler input format changed");
        self.in_format = format;
        self.prev = None;
        self.pos = 0.0;
    }

    fn convert(&mut self, input: &[Sample]) {
        if self.is_passthrough() {
            self.pending.extend(input.iter().copied());
            return;
        }
        let in_ch = self.in_format.channels.max(1) as usize;
        let out_ch = self.out_format.channels.max(1) as usize;
        let frames = input.len() / in_ch;
        if frames == 0 {
            return;
        }

        let mut mixed = Vec::with_capacity(frames * out_ch);
        for frame in input.chunks_exact(in_ch) {
            channel_mix(frame, out_ch, &mut mixed);
        }

        if self.in_format.sample_rate == self.out_format.sample_rate {
            self.pending.extend(mixed.iter().map(|&v| v as Sample));
            return;
        }
        self.rate_convert(&mixed, out_ch);
    }

    /// Linear interpolation over the carried previous frame plus the new
    /// block. The final input frame always stays behind as the next
    /// block's interpolation anchor.
    fn rate_convert(&mut self, mixed: &[f64], ch: usize) {
        let step = f64::from(self.in_format.sample_rate) / f64::from(self.out_format.sample_rate);
        let work: Vec<f64> = match self.prev.take() {
            Some(mut prev) => {
                prev.extend_from_slice(mixed);
                prev
            }
            None => mixed.to_vec(),
        };
        let total = work.len() / ch;
        let mut t = self.pos;
        while (t as usize) + 1 < total {
            let idx = t as usize;
            let frac = t - idx as f64;
            for c in 0..ch {
                let a = work[idx * ch + c];
                let b = work[(idx + 1) * ch + c];
                self.pending.push_back((a + (b - a) * frac) as Sample);
            }
            t += step;
        }
        if total > 0 {
            self.prev = Some(work[(total - 1) * ch..total * ch].to_vec());
            self.pos = t - (total - 1) as f64;
        }
    }
}

/// Mixes one input frame down or up to `out_ch` channels.
fn channel_mix(frame: &[Sample], out_ch: usize, dst: &mut Vec<f64>) {
    match (frame.len(), out_ch) {
        (n, m) if n == m => dst.extend(frame.iter().map(|&s| f64::from(s))),
        (2, 1) => dst.push((f64::from(frame[0]) + f64::from(frame[1])) / 2.0),
        (1, m) => {
            let v = f64::from(frame[0]);
            dst.extend(std::iter::repeat(v).take(m));
        }
        (n, m) => {
            // Uncommon layouts go through mono.
            let v = frame.iter().map(|&s| f64::from(s)).sum::<f64>() / n as f64;
            dst.extend(std::iter::repeat(v).take(m));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, scale: i32) -> Vec<Sample> {
        (0..len).map(|i| (i as i32 * scale) as Sample).collect()
    }

    #[test]
    fn test_passthrough_is_identity() {
        let fmt = AudioFormat::new(44100, 2);
        let mut res = LinearResampler::new(fmt, fmt, None);
        let input = ramp(200, 3);
        assert_eq!(res.write(&input, fmt), 200);

        let mut out = vec![SILENCE; 200];
        let mut reported = AudioFormat::UNKNOWN;
        let n = res.read(&mut out, &mut reported).unwrap();
        assert_eq!(n, 200);
        assert_eq!(reported, fmt);
        assert_eq!(out, input);
    }

    #[test]
    fn test_upsample_doubles_and_interpolates() {
        let mut res = LinearResampler::new(
            AudioFormat::new(22050, 1),
            AudioFormat::new(44100, 1),
            None,
        );
        let input = ramp(100, 10);
        res.write(&input, AudioFormat::UNKNOWN);

        // 100 input frames at half rate produce 198 outputs; the final
        // frame stays behind as the interpolation anchor.
        assert_eq!(res.delay(), 198);
        let mut out = vec![SILENCE; 198];
        let mut fmt = AudioFormat::UNKNOWN;
        res.read(&mut out, &mut fmt).unwrap();
        assert_eq!(out[0], 0 as Sample);
        assert_eq!(out[1], 5 as Sample);
        assert_eq!(out[2], 10 as Sample);
    }

    #[test]
    fn test_downsample_halves() {
        let mut res = LinearResampler::new(
            AudioFormat::new(44100, 1),
            AudioFormat::new(22050, 1),
            None,
        );
        res.write(&ramp(100, 10), AudioFormat::UNKNOWN);
        assert_eq!(res.delay(), 50);

        let mut out = vec![SILENCE; 50];
        let mut fmt = AudioFormat::UNKNOWN;
        res.read(&mut out, &mut fmt).unwrap();
        // Every other input sample survives.
        assert_eq!(out[0], 0 as Sample);
        assert_eq!(out[1], 20 as Sample);
        assert_eq!(out[2], 40 as Sample);
    }

    #[test]
    fn test_continuity_across_blocks() {
        let mut res = LinearResampler::new(
            AudioFormat::new(22050, 1),
            AudioFormat::new(44100, 1),
            None,
        );
        // Feed one ramp in two blocks; the splice must interpolate across
        // the block boundary rather than restart.
        let input = ramp(100, 10);
        res.write(&input[..50], AudioFormat::UNKNOWN);
        res.write(&input[50..], AudioFormat::UNKNOWN);

        let mut out = vec![SILENCE; res.delay()];
        let mut fmt = AudioFormat::UNKNOWN;
        let n = res.read(&mut out, &mut fmt).unwrap();
        for i in 1..n {
            let delta = f64::from(out[i]) - f64::from(out[i - 1]);
            assert!((delta - 5.0).abs() < 1.0, "discontinuity at {i}: {delta}");
        }
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut res = LinearResampler::new(
            AudioFormat::new(44100, 2),
            AudioFormat::new(44100, 1),
            None,
        );
        res.write(&[100 as Sample, 200 as Sample, 50 as Sample, 150 as Sample], AudioFormat::UNKNOWN);
        let mut out = vec![SILENCE; 2];
        let mut fmt = AudioFormat::UNKNOWN;
        assert_eq!(res.read(&mut out, &mut fmt).unwrap(), 2);
        assert_eq!(out, vec![150 as Sample, 100 as Sample]);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mut res = LinearResampler::new(
            AudioFormat::new(44100, 1),
            AudioFormat::new(44100, 2),
            None,
        );
        res.write(&[7 as Sample, 9 as Sample], AudioFormat::UNKNOWN);
        let mut out = vec![SILENCE; 4];
        let mut fmt = AudioFormat::UNKNOWN;
        assert_eq!(res.read(&mut out, &mut fmt).unwrap(), 4);
        assert_eq!(
            out,
            vec![7 as Sample, 7 as Sample, 9 as Sample, 9 as Sample]
        );
    }

    #[test]
    fn test_format_change_reconfigures() {
        let out_fmt = AudioFormat::new(44100, 2);
        let mut res = LinearResampler::new(AudioFormat::new(44100, 2), out_fmt, None);
        res.write(&[1 as Sample; 100], AudioFormat::UNKNOWN);
        // The producer switches to mono at half rate mid-stream.
        res.write(&[1 as Sample; 100], AudioFormat::new(22050, 1));
        assert_eq!(res.in_format(), AudioFormat::new(22050, 1));
        assert!(res.delay() > 100);
    }

    #[test]
    fn test_push_backlog_is_bounded() {
        let fmt = AudioFormat::new(44100, 2);
        let mut res = LinearResampler::new(fmt, fmt, None);
        let block = vec![1 as Sample; 4096];
        let mut accepted = 1;
        while accepted > 0 && res.delay() <= PENDING_LIMIT {
            accepted = res.write(&block, fmt);
        }
        // The backlog may overshoot by at most one frame of slack.
        assert!(res.delay() <= PENDING_LIMIT + fmt.channels as usize);
        assert_eq!(res.write(&block, fmt), 0);
    }

    #[test]
    fn test_pull_path_reads_source() {
        let fmt = AudioFormat::new(44100, 2);
        let mut produced = 0usize;
        let source: SourceFn = Box::new(move |dst, out| {
            *out = AudioFormat::new(44100, 2);
            let n = dst.len().min(1000 - produced.min(1000));
            for (i, slot) in dst[..n].iter_mut().enumerate() {
                *slot = ((produced + i) as i32) as Sample;
            }
            produced += n;
            Ok(n)
        });
        let mut res = LinearResampler::new(fmt, fmt, Some(source));

        let mut out = vec![SILENCE; 600];
        let mut reported = AudioFormat::UNKNOWN;
        assert_eq!(res.read(&mut out, &mut reported).unwrap(), 600);
        assert_eq!(out[0], 0 as Sample);
        assert_eq!(out[599], 599 as Sample);

        // The remaining 400 samples, then dry.
        assert_eq!(res.read(&mut out, &mut reported).unwrap(), 400);
        assert_eq!(res.read(&mut out, &mut reported).unwrap(), 0);
    }

    #[test]
    fn test_pull_failure_drains_then_errors() {
        let fmt = AudioFormat::new(44100, 1);
        let mut calls = 0;
        let source: SourceFn = Box::new(move |dst, out| {
            *out = AudioFormat::new(44100, 1);
            calls += 1;
            if calls > 1 {
                return Err(SourceError::new("gone"));
            }
            let n = dst.len().min(100);
            for slot in dst[..n].iter_mut() {
                *slot = 1 as Sample;
            }
            Ok(n)
        });
        let mut res = LinearResampler::new(fmt, fmt, Some(source));

        let mut out = vec![SILENCE; 300];
        let mut reported = AudioFormat::UNKNOWN;
        // First read hits the failure on its second pull but still serves
        // the 100 samples it got.
        assert_eq!(res.read(&mut out, &mut reported).unwrap(), 100);
        assert!(res.read(&mut out, &mut reported).is_err());
    }

    #[test]
    fn test_flush_discards_backlog() {
        let fmt = AudioFormat::new(44100, 2);
        let mut res = LinearResampler::new(fmt, fmt, None);
        res.write(&[1 as Sample; 500], fmt);
        assert_eq!(res.delay(), 500);
        res.flush();
        assert_eq!(res.delay(), 0);
    }
}
