//! Streaming sample-rate conversion.
//!
//! Wraps Rubato's asynchronous sinc resampler for use inside the decode loop: interleaved
//! `f32` input of any length is accumulated into fixed input chunks, and each full chunk is
//! converted immediately. The sinc delay is trimmed from the front of the output, so output
//! frame `n` lines up with input time `n / dst_rate`. [`StreamResampler::flush`] drains the tail
//! and the delay line, producing exactly `round(input_frames * ratio)` frames in total.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::{DecodeError, Result};

/// Interleaved-`f32` resampler with an internal input accumulator.
pub struct StreamResampler {
    resampler: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out_interleaved: Vec<f32>,
    indexing: Indexing,
    /// Input frames accepted since the last flush.
    input_frames: u64,
    /// Output frames returned since the last flush.
    output_frames: u64,
    /// Leading output frames still to discard.
    delay_left: usize,
}

impl StreamResampler {
    /// Build a resampler from `src_rate` to `dst_rate`.
    ///
    /// `chunk_frames` is the steady-state input chunk size; larger values reduce per-call
    /// overhead at the cost of latency.
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 || channels == 0 {
            return Err(DecodeError::FilterSetup(format!(
                "invalid resampler geometry: {src_rate} Hz -> {dst_rate} Hz, {channels} ch"
            )));
        }
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| DecodeError::FilterSetup(format!("resampler init: {e}")))?;

        let out_capacity_frames = resampler.output_frames_max();
        let delay_left = resampler.output_delay();

        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels),
            out_interleaved: vec![0.0; out_capacity_frames * channels],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            input_frames: 0,
            output_frames: 0,
            delay_left,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames accumulated but not yet converted.
    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    /// Output frames the sinc filter lags behind its input.
    pub fn delay(&self) -> usize {
        self.resampler.output_delay()
    }

    /// Convert as many full chunks as `input` completes. Returns interleaved output.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        self.input_frames += (input.len() / self.channels) as u64;

        let chunk_samples = self.chunk_frames * self.channels;
        let mut all_output = Vec::new();
        let mut consumed = 0;

        while self.pending.len() - consumed >= chunk_samples {
            let chunk = &self.pending[consumed..consumed + chunk_samples];
            let produced = run_chunk(
                &mut self.resampler,
                &mut self.indexing,
                &mut self.out_interleaved,
                chunk,
                self.channels,
                self.chunk_frames,
                None,
            )?;
            self.take_output(produced, &mut all_output, None);
            consumed += chunk_samples;
        }

        self.pending.drain(..consumed);
        Ok(all_output)
    }

    /// Convert the buffered tail and drain the delay line.
    ///
    /// The resampler is reset afterwards and may be fed again as a fresh stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let expected = (self.input_frames as f64 * self.resampler.resample_ratio()).round() as u64;
        let mut all_output = Vec::new();

        let tail_frames = self.pending_frames();
        let mut chunk = std::mem::take(&mut self.pending);
        chunk.resize(self.chunk_frames * self.channels, 0.0);
        let mut partial = tail_frames;

        while self.output_frames < expected {
            let produced = run_chunk(
                &mut self.resampler,
                &mut self.indexing,
                &mut self.out_interleaved,
                &chunk,
                self.channels,
                self.chunk_frames,
                Some(partial),
            )?;
            if produced == 0 {
                break;
            }
            self.take_output(produced, &mut all_output, Some(expected));
            partial = 0;
        }

        self.resampler.reset();
        self.pending = chunk;
        self.pending.clear();
        self.input_frames = 0;
        self.output_frames = 0;
        self.delay_left = self.resampler.output_delay();
        Ok(all_output)
    }

    /// Append the last call's output to `out`, minus any remaining delay and anything past
    /// `limit` total frames.
    fn take_output(&mut self, produced_samples: usize, out: &mut Vec<f32>, limit: Option<u64>) {
        let produced_frames = produced_samples / self.channels;
        let skip = self.delay_left.min(produced_frames);
        self.delay_left -= skip;

        let mut keep = produced_frames - skip;
        if let Some(limit) = limit {
            keep = keep.min(limit.saturating_sub(self.output_frames) as usize);
        }
        let from = skip * self.channels;
        out.extend_from_slice(&self.out_interleaved[from..from + keep * self.channels]);
        self.output_frames += keep as u64;
    }
}

/// Run one chunk through `resampler`; returns the number of output **samples** written.
fn run_chunk(
    resampler: &mut Async<f32>,
    indexing: &mut Indexing,
    out_interleaved: &mut [f32],
    chunk: &[f32],
    channels: usize,
    chunk_frames: usize,
    partial_len: Option<usize>,
) -> Result<usize> {
    let input_adapter = InterleavedSlice::new(chunk, channels, chunk_frames)
        .map_err(|e| DecodeError::FilterRuntime(format!("interleaved slice (input): {e}")))?;

    let out_capacity_frames = out_interleaved.len() / channels;
    let mut output_adapter =
        InterleavedSlice::new_mut(out_interleaved, channels, out_capacity_frames)
            .map_err(|e| DecodeError::FilterRuntime(format!("interleaved slice (output): {e}")))?;

    indexing.input_offset = 0;
    indexing.output_offset = 0;
    indexing.partial_len = partial_len;

    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&*indexing))
        .map_err(|e| DecodeError::FilterRuntime(format!("resampler process: {e}")))?;

    Ok(nbr_out * channels)
}
