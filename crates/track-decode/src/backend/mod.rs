//! Boundary to the external demux/decode capability.
//!
//! The session only talks to these traits; [`symphonia_backend::SymphoniaBackend`] is the
//! production implementation. Handles returned here own library state and release it on drop,
//! so every session exit path (including errors) closes them exactly once.

pub mod symphonia_backend;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::frame::{AudioFormat, AudioFrame};

/// Path or URI naming a media source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceRef {
    Path(PathBuf),
    Uri(String),
}

impl SourceRef {
    /// Interpret `raw` as a `file://` URI, another URI, or a plain path.
    pub fn parse(raw: &str) -> Self {
        if let Some(path) = raw.strip_prefix("file://") {
            return SourceRef::Path(PathBuf::from(path));
        }
        match raw.split_once("://") {
            Some((scheme, _))
                if !scheme.is_empty()
                    && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') =>
            {
                SourceRef::Uri(raw.to_string())
            }
            _ => SourceRef::Path(PathBuf::from(raw)),
        }
    }

    /// Lower-case file extension, used as a container hint.
    pub fn extension(&self) -> Option<String> {
        let path = match self {
            SourceRef::Path(p) => p.as_path(),
            SourceRef::Uri(u) => Path::new(u.rsplit('/').next().unwrap_or(u.as_str())),
        };
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Path(p) => write!(f, "{}", p.display()),
            SourceRef::Uri(u) => f.write_str(u),
        }
    }
}

impl From<&str> for SourceRef {
    fn from(raw: &str) -> Self {
        SourceRef::parse(raw)
    }
}

impl From<PathBuf> for SourceRef {
    fn from(path: PathBuf) -> Self {
        SourceRef::Path(path)
    }
}

impl From<&Path> for SourceRef {
    fn from(path: &Path) -> Self {
        SourceRef::Path(path.to_path_buf())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Other,
}

/// One elementary stream inside a source.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: Option<String>,
    /// Native decoded format, when the container declares it.
    pub format: Option<AudioFormat>,
}

/// Chapter as read from the container, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct RawChapter {
    pub start: Duration,
    pub end: Option<Duration>,
    pub title: Option<String>,
}

/// Container-level description gathered at open time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceInfo {
    pub duration: Option<Duration>,
    /// Tags in container order; keys are already normalized.
    pub tags: Vec<(String, String)>,
    pub chapters: Vec<RawChapter>,
    pub streams: Vec<StreamInfo>,
}

/// Compressed unit read from a source. Ownership moves into the decoder.
#[derive(Debug)]
pub struct Packet {
    pub stream: usize,
    /// Timestamp in the stream's own time base.
    pub ts: u64,
    /// Duration in the stream's own time base.
    pub dur: u64,
    pub data: Box<[u8]>,
}

/// Failure reading or decoding a single unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// Bad packet/frame; the next one may be fine.
    Corrupt(String),
    /// The stream cannot continue.
    Fatal(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            BackendError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

/// Opens sources. Shared across threads; one instance serves every session.
pub trait MediaBackend: Send + Sync {
    /// Open `source` for reading. Fails with [`DecodeError::Open`](crate::DecodeError::Open).
    fn open(&self, source: &SourceRef) -> Result<Box<dyn Demuxer>>;
}

/// An open source. Dropping it closes the underlying handle.
pub trait Demuxer: Send {
    fn info(&self) -> &SourceInfo;

    /// Next packet from any stream, `Ok(None)` at end of packets.
    fn read_packet(&mut self) -> std::result::Result<Option<Packet>, BackendError>;

    /// Reposition `stream` at or before `target`; returns the position actually reached.
    fn seek(&mut self, stream: usize, target: Duration) -> Result<Duration>;

    /// Build the decoder bound to `stream`.
    fn open_decoder(&self, stream: usize) -> Result<Box<dyn StreamDecoder>>;
}

/// Decoder bound to one stream for the lifetime of a session.
pub trait StreamDecoder: Send {
    /// Decode one packet into interleaved `f32`. `Ok(None)` when the packet yields no audio.
    fn decode(&mut self, packet: Packet) -> std::result::Result<Option<AudioFrame>, BackendError>;

    /// Drain frames still buffered inside the decoder at end of packets.
    fn flush(&mut self) -> Vec<AudioFrame>;

    /// Drop internal state after a seek.
    fn reset(&mut self);
}
