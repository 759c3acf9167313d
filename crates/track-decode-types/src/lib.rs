use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a decode failure as reported upward to the player.
///
/// The caller uses this to decide whether to skip the track, retry it, or alert an operator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Source unreadable or not recognized as a container.
    Open,
    /// Source holds no usable audio stream.
    NoAudioStream,
    /// Resample/filter stage could not be constructed.
    FilterSetup,
    /// Resample/filter stage failed repeatedly while processing.
    FilterRuntime,
    /// Unrecoverable read/decode failure.
    Decode,
    /// Seek target unreachable.
    Seek,
    /// Chapter index outside the source's chapter list.
    InvalidChapter,
    /// Downstream consumer shut down.
    ConsumerClosed,
}

impl ErrorKind {
    /// Stable name used in logs and the prober's text output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Open => "OpenError",
            ErrorKind::NoAudioStream => "NoAudioStreamError",
            ErrorKind::FilterSetup => "FilterSetupError",
            ErrorKind::FilterRuntime => "FilterRuntimeError",
            ErrorKind::Decode => "DecodeError",
            ErrorKind::Seek => "SeekError",
            ErrorKind::InvalidChapter => "InvalidChapterError",
            ErrorKind::ConsumerClosed => "ConsumerClosed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a decode session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Natural end of stream, or the end of a confined chapter.
    Eof,
    /// Explicit stop command.
    Stopped,
    /// Downstream consumer closed its end of the hand-off buffer.
    ConsumerClosed,
    /// Terminal decode, filter or open failure.
    Error,
}

/// One chapter of a source's timeline. `end_ms` is `None` when the chapter is open-ended.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterInfo {
    /// Position in the normalized chapter list.
    pub index: usize,
    /// Chapter start in milliseconds.
    pub start_ms: u64,
    /// Chapter end (exclusive) in milliseconds.
    pub end_ms: Option<u64>,
    /// Chapter title, if the container provides one.
    pub title: Option<String>,
}

impl ChapterInfo {
    /// Whether `ms` lies in `[start_ms, end_ms)`.
    pub fn contains_ms(&self, ms: u64) -> bool {
        ms >= self.start_ms && self.end_ms.is_none_or(|end| ms < end)
    }
}

/// Native format of the stream selected for decoding.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamFormat {
    /// Index of the stream within the source.
    pub index: usize,
    /// Codec label (best-effort).
    pub codec: Option<String>,
    /// Native sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Native channel count.
    pub channels: Option<u16>,
}

/// Result of probing a source without decoding it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total duration in milliseconds when known.
    pub duration_ms: Option<u64>,
    /// Normalized, lower-case tag keys mapped to their values.
    pub tags: BTreeMap<String, String>,
    /// Chapters ordered by start offset.
    pub chapters: Vec<ChapterInfo>,
    /// Stream that a decode session would select by default.
    pub stream: Option<StreamFormat>,
}
