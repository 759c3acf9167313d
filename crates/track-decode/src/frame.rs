//! Sample formats and the audio units passed between pipeline stages.
//!
//! All stages carry interleaved `f32` samples:
//! `frame0[ch0], frame0[ch1], ..., frame1[ch0], frame1[ch1], ...`

use std::fmt;
use std::time::Duration;

/// Sample rate and channel count of an interleaved `f32` stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz/{} ch", self.sample_rate, self.channels)
    }
}

/// Duration of `frames` sample frames at `rate` Hz, exact to the nanosecond.
pub fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let nanos = (frames as u128 * 1_000_000_000) / rate as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Number of whole frames covering `duration` at `rate` Hz (rounded down).
pub fn duration_to_frames(duration: Duration, rate: u32) -> u64 {
    let frames = duration.as_nanos() * rate as u128 / 1_000_000_000;
    u64::try_from(frames).unwrap_or(u64::MAX)
}

/// One decoded (or filtered) unit of audio positioned on the source timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    /// Source-timeline position of the first sample frame.
    pub start: Duration,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(format: AudioFormat, start: Duration, samples: Vec<f32>) -> Self {
        Self {
            format,
            start,
            samples,
        }
    }

    pub fn frames(&self) -> usize {
        if self.format.channels == 0 {
            0
        } else {
            self.samples.len() / self.format.channels
        }
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames() as u64, self.format.sample_rate)
    }

    /// Position just past the last sample frame.
    pub fn end(&self) -> Duration {
        self.start + self.duration()
    }

    /// Drop leading frames so the frame starts at `at`. No-op when `at <= start`.
    pub fn trim_front_to(&mut self, at: Duration) {
        if at <= self.start {
            return;
        }
        let skip = duration_to_frames(at - self.start, self.format.sample_rate) as usize;
        let skip = skip.min(self.frames());
        self.samples.drain(..skip * self.format.channels);
        self.start += frames_to_duration(skip as u64, self.format.sample_rate);
    }

    /// Drop trailing frames so the frame ends at or before `at`.
    pub fn trim_back_to(&mut self, at: Duration) {
        if at >= self.end() {
            return;
        }
        let keep = if at <= self.start {
            0
        } else {
            duration_to_frames(at - self.start, self.format.sample_rate) as usize
        };
        self.samples.truncate(keep.min(self.frames()) * self.format.channels);
    }
}

/// A finished block handed to the mixer, with the session gain already applied.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBlock {
    pub format: AudioFormat,
    pub start: Duration,
    /// Gain factor that was multiplied into `samples`.
    pub gain: f32,
    pub samples: Vec<f32>,
}

impl SampleBlock {
    pub fn frames(&self) -> usize {
        if self.format.channels == 0 {
            0
        } else {
            self.samples.len() / self.format.channels
        }
    }

    pub fn end(&self) -> Duration {
        self.start + frames_to_duration(self.frames() as u64, self.format.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(frames: usize, start_ms: u64) -> AudioFrame {
        AudioFrame::new(
            AudioFormat::new(1000, 2),
            Duration::from_millis(start_ms),
            (0..frames * 2).map(|i| i as f32).collect(),
        )
    }

    #[test]
    fn frames_to_duration_is_exact() {
        assert_eq!(frames_to_duration(48_000, 48_000), Duration::from_secs(1));
        assert_eq!(frames_to_duration(1, 0), Duration::ZERO);
        assert_eq!(duration_to_frames(Duration::from_millis(500), 44_100), 22_050);
    }

    #[test]
    fn trim_front_moves_start() {
        let mut f = frame(10, 100);
        f.trim_front_to(Duration::from_millis(104));
        assert_eq!(f.start, Duration::from_millis(104));
        assert_eq!(f.frames(), 6);
        assert_eq!(f.samples[0], 8.0);
    }

    #[test]
    fn trim_back_cuts_tail() {
        let mut f = frame(10, 100);
        f.trim_back_to(Duration::from_millis(103));
        assert_eq!(f.frames(), 3);
        assert_eq!(f.end(), Duration::from_millis(103));

        let mut g = frame(10, 100);
        g.trim_back_to(Duration::from_millis(50));
        assert_eq!(g.frames(), 0);
    }
}
