//! Resample/filter stage: converts decoded frames to the mixer's fixed format.
//!
//! The stage is a tagged value swapped whole between decode iterations: [`FilterStage::NoFilter`]
//! when the decoded format already matches the target, [`FilterStage::Active`] otherwise. A
//! format change or a seek replaces the value with a freshly built one; a graph is never
//! reconfigured in place.

use std::time::Duration;

use crate::error::{DecodeError, Result};
use crate::frame::{AudioFormat, AudioFrame, frames_to_duration};
use crate::resample::StreamResampler;

pub enum FilterStage {
    NoFilter,
    Active(FilterGraph),
}

impl FilterStage {
    /// Build the stage for `input` frames delivered as `target`.
    pub fn build(input: AudioFormat, target: AudioFormat, chunk_frames: usize) -> Result<Self> {
        if input == target {
            return Ok(FilterStage::NoFilter);
        }
        Ok(FilterStage::Active(FilterGraph::new(input, target, chunk_frames)?))
    }

    /// The session's resample flag.
    pub fn is_active(&self) -> bool {
        matches!(self, FilterStage::Active(_))
    }

    /// Pass `frame` through; returns zero or more frames in the target format.
    pub fn process(&mut self, frame: AudioFrame) -> Result<Vec<AudioFrame>> {
        match self {
            FilterStage::NoFilter => Ok(vec![frame]),
            FilterStage::Active(graph) => graph.process(frame),
        }
    }

    /// Drain whatever the graph still buffers.
    pub fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        match self {
            FilterStage::NoFilter => Ok(Vec::new()),
            FilterStage::Active(graph) => graph.flush(),
        }
    }
}

/// Channel remix followed by optional sample-rate conversion.
pub struct FilterGraph {
    input: AudioFormat,
    target: AudioFormat,
    resampler: Option<StreamResampler>,
    /// Timestamp of the first input frame since the graph was built.
    origin: Option<Duration>,
    produced_frames: u64,
}

impl FilterGraph {
    pub fn new(input: AudioFormat, target: AudioFormat, chunk_frames: usize) -> Result<Self> {
        if input.channels == 0 || input.sample_rate == 0 {
            return Err(DecodeError::FilterSetup(format!("unusable input format {input}")));
        }
        let resampler = if input.sample_rate != target.sample_rate {
            Some(StreamResampler::new(
                input.sample_rate,
                target.sample_rate,
                target.channels,
                chunk_frames,
            )?)
        } else {
            None
        };
        tracing::debug!(
            from = %input,
            to = %target,
            resampling = resampler.is_some(),
            "filter graph built"
        );
        Ok(Self {
            input,
            target,
            resampler,
            origin: None,
            produced_frames: 0,
        })
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input
    }

    pub fn process(&mut self, frame: AudioFrame) -> Result<Vec<AudioFrame>> {
        if frame.format != self.input {
            return Err(DecodeError::FilterRuntime(format!(
                "frame format {} does not match graph input {}",
                frame.format, self.input
            )));
        }
        let remixed = remix(&frame.samples, self.input.channels, self.target.channels);

        match self.resampler.as_mut() {
            None => Ok(vec![AudioFrame::new(self.target, frame.start, remixed)]),
            Some(resampler) => {
                let origin = *self.origin.get_or_insert(frame.start);
                let out = resampler.process(&remixed)?;
                Ok(self.emit(origin, out))
            }
        }
    }

    pub fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        let (Some(resampler), Some(origin)) = (self.resampler.as_mut(), self.origin) else {
            return Ok(Vec::new());
        };
        let out = resampler.flush()?;
        let frames = self.emit(origin, out);
        self.origin = None;
        self.produced_frames = 0;
        Ok(frames)
    }

    fn emit(&mut self, origin: Duration, samples: Vec<f32>) -> Vec<AudioFrame> {
        if samples.is_empty() {
            return Vec::new();
        }
        let start = origin + frames_to_duration(self.produced_frames, self.target.sample_rate);
        let frame = AudioFrame::new(self.target, start, samples);
        self.produced_frames += frame.frames() as u64;
        vec![frame]
    }
}

/// Map interleaved `src_channels` audio onto `dst_channels`.
///
/// Mapping rules:
/// - equal counts: pass-through
/// - mono → N: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: best-effort "clamp to available channels"
pub fn remix(samples: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == dst_channels || src_channels == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in samples.chunks_exact(src_channels) {
        for dst_ch in 0..dst_channels {
            let v = match (src_channels, dst_channels) {
                (1, _) => frame[0],
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                _ => frame[dst_ch.min(src_channels - 1)],
            };
            out.push(v);
        }
    }
    out
}
