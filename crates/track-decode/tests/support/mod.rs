//! Deterministic in-memory media backend for session tests.
//!
//! Packets carry a tiny header instead of compressed audio; the fake decoder turns it into a
//! frame of constant samples so tests can reason about exact timestamps and sizes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use track_decode::backend::{
    BackendError, Demuxer, MediaBackend, Packet, RawChapter, SourceInfo, SourceRef,
    StreamDecoder, StreamInfo, StreamKind,
};
use track_decode::frame::{AudioFrame, frames_to_duration};
use track_decode::{AudioFormat, BlockReceiver, DecodeError, SampleBlock, SessionEvent};

/// Value of every decoded sample.
pub const SAMPLE: f32 = 0.25;

const KIND_AUDIO: u8 = 0;
const KIND_BAD_FRAME: u8 = 1;
const KIND_FATAL: u8 = 2;

#[derive(Clone, Debug)]
pub enum FakePacket {
    Audio {
        stream: usize,
        start: Duration,
        format: AudioFormat,
        frames: usize,
    },
    /// Read fails with a recoverable error.
    CorruptRead,
    /// Read succeeds; decoding it fails with a recoverable error.
    BadFrame { stream: usize, start: Duration },
    /// Decoding fails for good.
    FatalFrame { stream: usize, start: Duration },
}

#[derive(Clone, Debug, Default)]
pub struct FakeSource {
    pub duration: Option<Duration>,
    pub tags: Vec<(String, String)>,
    pub chapters: Vec<RawChapter>,
    pub streams: Vec<StreamInfo>,
    pub packets: Vec<FakePacket>,
    pub fail_seek: bool,
}

impl FakeSource {
    /// One audio stream of `total` length cut into packets of `packet_frames`.
    pub fn tone(format: AudioFormat, total: Duration, packet_frames: usize) -> Self {
        let mut source = Self {
            duration: Some(total),
            streams: vec![audio_stream(0, format)],
            ..Default::default()
        };
        source.append_audio(0, format, Duration::ZERO, total, packet_frames);
        source
    }

    /// Append contiguous packets covering `[from, from + len)`.
    pub fn append_audio(
        &mut self,
        stream: usize,
        format: AudioFormat,
        from: Duration,
        len: Duration,
        packet_frames: usize,
    ) {
        let total_frames =
            (len.as_nanos() * format.sample_rate as u128 / 1_000_000_000) as u64;
        let mut done = 0u64;
        while done < total_frames {
            let frames = (total_frames - done).min(packet_frames as u64);
            self.packets.push(FakePacket::Audio {
                stream,
                start: from + frames_to_duration(done, format.sample_rate),
                format,
                frames: frames as usize,
            });
            done += frames;
        }
    }

    /// Chapters given as `(start_s, end_s, title)`.
    pub fn with_chapters(mut self, chapters: &[(u64, u64, &str)]) -> Self {
        self.chapters = chapters
            .iter()
            .map(|(start, end, title)| RawChapter {
                start: Duration::from_secs(*start),
                end: Some(Duration::from_secs(*end)),
                title: Some(title.to_string()),
            })
            .collect();
        self
    }

    pub fn with_tags(mut self, tags: &[(&str, &str)]) -> Self {
        self.tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// Insert `packet` before the packet at `index`.
    pub fn insert(mut self, index: usize, packet: FakePacket) -> Self {
        self.packets.insert(index.min(self.packets.len()), packet);
        self
    }
}

pub fn audio_stream(index: usize, format: AudioFormat) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Audio,
        codec: Some("FAKE".to_string()),
        format: Some(format),
    }
}

pub fn other_stream(index: usize) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Other,
        codec: None,
        format: None,
    }
}

/// Backend serving [`FakeSource`]s by path; unknown paths fail to open.
#[derive(Default)]
pub struct FakeBackend {
    sources: HashMap<String, FakeSource>,
    open_handles: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, source: FakeSource) -> Self {
        self.sources.insert(path.to_string(), source);
        self
    }

    /// Demuxers currently alive.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Total successful opens.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl MediaBackend for FakeBackend {
    fn open(&self, source: &SourceRef) -> track_decode::Result<Box<dyn Demuxer>> {
        let fake = self
            .sources
            .get(&source.to_string())
            .cloned()
            .ok_or_else(|| DecodeError::Open(format!("no such source: {source}")))?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let info = SourceInfo {
            duration: fake.duration,
            tags: fake.tags.clone(),
            chapters: fake.chapters.clone(),
            streams: fake.streams.clone(),
        };
        Ok(Box::new(FakeDemuxer {
            info,
            packets: fake.packets,
            cursor: 0,
            fail_seek: fake.fail_seek,
            open_handles: self.open_handles.clone(),
        }))
    }
}

struct FakeDemuxer {
    info: SourceInfo,
    packets: Vec<FakePacket>,
    cursor: usize,
    fail_seek: bool,
    open_handles: Arc<AtomicUsize>,
}

impl Drop for FakeDemuxer {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Demuxer for FakeDemuxer {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, BackendError> {
        let Some(packet) = self.packets.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        match packet {
            FakePacket::Audio {
                stream,
                start,
                format,
                frames,
            } => Ok(Some(encode(KIND_AUDIO, stream, start, format, frames))),
            FakePacket::CorruptRead => Err(BackendError::Corrupt("bad packet header".to_string())),
            FakePacket::BadFrame { stream, start } => Ok(Some(encode(
                KIND_BAD_FRAME,
                stream,
                start,
                AudioFormat::new(0, 0),
                0,
            ))),
            FakePacket::FatalFrame { stream, start } => Ok(Some(encode(
                KIND_FATAL,
                stream,
                start,
                AudioFormat::new(0, 0),
                0,
            ))),
        }
    }

    fn seek(&mut self, stream: usize, target: Duration) -> track_decode::Result<Duration> {
        if self.fail_seek {
            return Err(DecodeError::Seek(format!("cannot reach {target:?}")));
        }
        let landing = self
            .packets
            .iter()
            .enumerate()
            .filter_map(|(i, p)| match p {
                FakePacket::Audio {
                    stream: s, start, ..
                } if *s == stream && *start <= target => Some((i, *start)),
                _ => None,
            })
            .last();
        let (index, start) = landing.unwrap_or((0, Duration::ZERO));
        self.cursor = index;
        Ok(start)
    }

    fn open_decoder(&self, stream: usize) -> track_decode::Result<Box<dyn StreamDecoder>> {
        if self.info.streams.get(stream).is_none() {
            return Err(DecodeError::NoAudioStream(format!("no stream {stream}")));
        }
        Ok(Box::new(FakeDecoder))
    }
}

fn encode(kind: u8, stream: usize, start: Duration, format: AudioFormat, frames: usize) -> Packet {
    let mut data = Vec::with_capacity(10);
    data.push(kind);
    data.extend_from_slice(&format.sample_rate.to_le_bytes());
    data.push(format.channels as u8);
    data.extend_from_slice(&(frames as u32).to_le_bytes());
    Packet {
        stream,
        ts: start.as_nanos() as u64,
        dur: frames_to_duration(frames as u64, format.sample_rate).as_nanos() as u64,
        data: data.into_boxed_slice(),
    }
}

struct FakeDecoder;

impl StreamDecoder for FakeDecoder {
    fn decode(&mut self, packet: Packet) -> Result<Option<AudioFrame>, BackendError> {
        let data = &packet.data;
        match data[0] {
            KIND_BAD_FRAME => return Err(BackendError::Corrupt("bad frame".to_string())),
            KIND_FATAL => return Err(BackendError::Fatal("decoder lost sync".to_string())),
            _ => {}
        }
        let rate = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let channels = data[5] as usize;
        let frames = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        Ok(Some(AudioFrame::new(
            AudioFormat::new(rate, channels),
            Duration::from_nanos(packet.ts),
            vec![SAMPLE; frames * channels],
        )))
    }

    fn flush(&mut self) -> Vec<AudioFrame> {
        Vec::new()
    }

    fn reset(&mut self) {}
}

/// Collect events until `Closed` or the timeout.
pub fn events_until_closed(rx: &Receiver<SessionEvent>, timeout: Duration) -> Vec<SessionEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) => {
                let closed = matches!(event, SessionEvent::Closed { .. });
                events.push(event);
                if closed {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    events
}

/// Wait for the first event matching `pred`.
pub fn wait_for(
    rx: &Receiver<SessionEvent>,
    timeout: Duration,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Option<SessionEvent> {
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

/// Take every block until the session finishes.
pub fn drain(rx: &BlockReceiver) -> Vec<SampleBlock> {
    let mut blocks = Vec::new();
    while let Some(block) = rx.recv_timeout(Duration::from_secs(10)) {
        blocks.push(block);
    }
    blocks
}

/// Longest run of frames in which every sample is quieter than `threshold`.
pub fn longest_quiet_run(blocks: &[SampleBlock], threshold: f32) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for block in blocks {
        for frame in block.samples.chunks(block.format.channels.max(1)) {
            if frame.iter().all(|s| s.abs() < threshold) {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
    }
    longest
}

/// Frames at the head of `block` quieter than `threshold`.
pub fn leading_quiet_frames(block: &SampleBlock, threshold: f32) -> usize {
    block
        .samples
        .chunks(block.format.channels.max(1))
        .take_while(|frame| frame.iter().all(|s| s.abs() < threshold))
        .count()
}
