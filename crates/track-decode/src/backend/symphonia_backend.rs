//! Symphonia implementation of the media backend.
//!
//! Uses Symphonia to:
//! - probe the container and collect tags, cue-sheet chapters and stream layouts
//! - pick up ID3v2 `CHAP` chapters (podcasts, audiobooks) through the `id3` crate
//! - read packets and seek on the probed `FormatReader`
//! - decode packets into interleaved `f32` frames

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{
    FormatOptions, FormatReader, Packet as SymphoniaPacket, SeekMode, SeekTo,
};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag, Value};
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::{
    BackendError, Demuxer, MediaBackend, Packet, RawChapter, SourceInfo, SourceRef,
    StreamDecoder, StreamInfo, StreamKind,
};
use crate::error::{DecodeError, Result};
use crate::frame::{AudioFormat, AudioFrame, frames_to_duration};

/// Production backend over Symphonia's default format and codec registries.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaBackend;

impl SymphoniaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for SymphoniaBackend {
    fn open(&self, source: &SourceRef) -> Result<Box<dyn Demuxer>> {
        let path = match source {
            SourceRef::Path(p) => p,
            SourceRef::Uri(u) => {
                return Err(DecodeError::Open(format!("unsupported URI scheme: {u}")));
            }
        };
        let file = File::open(path)
            .map_err(|e| DecodeError::Open(format!("open {}: {e}", path.display())))?;

        let mut hint = Hint::new();
        if let Some(ext) = source.extension() {
            hint.with_extension(&ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Open(format!("probe {source}: {e}")))?;

        // Leading metadata (ID3v2 and friends) first, so in-container tags override it.
        let mut tags = Vec::new();
        if let Some(metadata) = probed.metadata.get() {
            if let Some(rev) = metadata.current() {
                collect_tags(rev.tags(), &mut tags);
            }
        }

        let mut format = probed.format;
        {
            let metadata = format.metadata();
            if let Some(rev) = metadata.current() {
                collect_tags(rev.tags(), &mut tags);
            }
        }

        let tracks: Vec<TrackTiming> = format
            .tracks()
            .iter()
            .map(|t| TrackTiming {
                id: t.id,
                time_base: t.codec_params.time_base,
                sample_rate: t.codec_params.sample_rate,
                codec_params: t.codec_params.clone(),
            })
            .collect();

        let streams = tracks
            .iter()
            .enumerate()
            .map(|(index, t)| stream_info(index, &t.codec_params))
            .collect();

        let default_id = format.default_track().map(|t| t.id);
        let default_timing = tracks
            .iter()
            .find(|t| Some(t.id) == default_id)
            .or_else(|| tracks.first());

        let duration = default_timing.and_then(|t| {
            let frames = t.codec_params.n_frames?;
            match t.sample_rate {
                Some(rate) if rate > 0 => Some(frames_to_duration(frames, rate)),
                _ => t.time_base.map(|tb| time_to_duration(tb.calc_time(frames))),
            }
        });

        let mut chapters = id3_chapters(path);
        if chapters.is_empty() {
            chapters = default_timing
                .map(|timing| {
                    format
                        .cues()
                        .iter()
                        .map(|cue| RawChapter {
                            start: timing.ts_to_duration(cue.start_ts),
                            end: None,
                            title: cue_title(&cue.tags),
                        })
                        .collect()
                })
                .unwrap_or_default();
        }

        let info = SourceInfo {
            duration,
            tags,
            chapters,
            streams,
        };
        tracing::debug!(
            source = %source,
            streams = info.streams.len(),
            chapters = info.chapters.len(),
            "source opened"
        );

        Ok(Box::new(SymphoniaDemuxer {
            format,
            info,
            tracks,
        }))
    }
}

/// Per-track timing and codec data kept after probing.
#[derive(Clone)]
struct TrackTiming {
    id: u32,
    time_base: Option<TimeBase>,
    sample_rate: Option<u32>,
    codec_params: CodecParameters,
}

impl TrackTiming {
    fn ts_to_duration(&self, ts: u64) -> Duration {
        match self.time_base {
            Some(tb) => time_to_duration(tb.calc_time(ts)),
            None => frames_to_duration(ts, self.sample_rate.unwrap_or(0)),
        }
    }
}

struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    info: SourceInfo,
    tracks: Vec<TrackTiming>,
}

impl Demuxer for SymphoniaDemuxer {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_packet(&mut self) -> std::result::Result<Option<Packet>, BackendError> {
        match self.format.next_packet() {
            Ok(packet) => {
                let stream = self
                    .tracks
                    .iter()
                    .position(|t| t.id == packet.track_id())
                    .unwrap_or(usize::MAX);
                Ok(Some(Packet {
                    stream,
                    ts: packet.ts(),
                    dur: packet.dur(),
                    data: packet.buf().into(),
                }))
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(SymphoniaError::DecodeError(msg)) => Err(BackendError::Corrupt(msg.to_string())),
            Err(SymphoniaError::ResetRequired) => {
                Err(BackendError::Fatal("track list changed".to_string()))
            }
            Err(e) => Err(BackendError::Fatal(e.to_string())),
        }
    }

    fn seek(&mut self, stream: usize, target: Duration) -> Result<Duration> {
        let timing = self
            .tracks
            .get(stream)
            .cloned()
            .ok_or_else(|| DecodeError::Seek(format!("no stream {stream}")))?;
        let time = Time::new(target.as_secs(), target.subsec_nanos() as f64 / 1e9);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(timing.id),
                },
            )
            .map_err(|e| DecodeError::Seek(format!("{e} (target {target:?})")))?;
        Ok(timing.ts_to_duration(seeked.actual_ts))
    }

    fn open_decoder(&self, stream: usize) -> Result<Box<dyn StreamDecoder>> {
        let timing = self
            .tracks
            .get(stream)
            .cloned()
            .ok_or_else(|| DecodeError::NoAudioStream(format!("no stream {stream}")))?;
        let decoder = symphonia::default::get_codecs()
            .make(&timing.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Open(format!("no decoder for stream {stream}: {e}")))?;
        Ok(Box::new(SymphoniaStreamDecoder { decoder, timing }))
    }
}

struct SymphoniaStreamDecoder {
    decoder: Box<dyn Decoder>,
    timing: TrackTiming,
}

impl StreamDecoder for SymphoniaStreamDecoder {
    fn decode(&mut self, packet: Packet) -> std::result::Result<Option<AudioFrame>, BackendError> {
        let start = self.timing.ts_to_duration(packet.ts);
        let packet = SymphoniaPacket::new_from_boxed_slice(
            self.timing.id,
            packet.ts,
            packet.dur,
            packet.data,
        );

        let result = match self.decoder.decode(&packet) {
            Ok(decoded) => {
                if decoded.frames() == 0 {
                    Ok(None)
                } else {
                    let spec = *decoded.spec();
                    let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    let format = AudioFormat::new(spec.rate, spec.channels.count());
                    Ok(Some(AudioFrame::new(
                        format,
                        start,
                        sample_buf.samples().to_vec(),
                    )))
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(frame) => Ok(frame),
            Err(SymphoniaError::DecodeError(msg)) => Err(BackendError::Corrupt(msg.to_string())),
            Err(SymphoniaError::IoError(e)) => Err(BackendError::Corrupt(e.to_string())),
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                Err(BackendError::Corrupt("decoder reset required".to_string()))
            }
            Err(e) => Err(BackendError::Fatal(e.to_string())),
        }
    }

    fn flush(&mut self) -> Vec<AudioFrame> {
        // Symphonia decoders emit everything per packet.
        Vec::new()
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }
}

fn time_to_duration(time: Time) -> Duration {
    let frac = if time.frac.is_finite() && time.frac > 0.0 {
        Duration::from_secs_f64(time.frac)
    } else {
        Duration::ZERO
    };
    Duration::from_secs(time.seconds) + frac
}

fn stream_info(index: usize, params: &CodecParameters) -> StreamInfo {
    let is_audio = params.codec != CODEC_TYPE_NULL
        && (params.sample_rate.is_some() || params.channels.is_some());
    let format = match (params.sample_rate, params.channels) {
        (Some(rate), Some(channels)) => Some(AudioFormat::new(rate, channels.count())),
        _ => None,
    };
    StreamInfo {
        index,
        kind: if is_audio {
            StreamKind::Audio
        } else {
            StreamKind::Other
        },
        codec: codec_name_from_params(params),
        format,
    }
}

fn collect_tags(tags: &[Tag], out: &mut Vec<(String, String)>) {
    for tag in tags {
        if matches!(tag.value, Value::Binary(_)) {
            continue;
        }
        let value = tag.value.to_string();
        if value.trim().is_empty() {
            continue;
        }
        out.push((tag_key(tag), value));
    }
}

/// Stable lower-case key for a tag; well-known tags get container-independent names.
fn tag_key(tag: &Tag) -> String {
    if let Some(name) = tag.std_key.and_then(standard_key_name) {
        return name.to_string();
    }
    tag.key.to_ascii_lowercase()
}

fn standard_key_name(key: StandardTagKey) -> Option<&'static str> {
    let name = match key {
        StandardTagKey::TrackTitle => "title",
        StandardTagKey::Artist => "artist",
        StandardTagKey::Album => "album",
        StandardTagKey::AlbumArtist => "album_artist",
        StandardTagKey::Genre => "genre",
        StandardTagKey::Date => "date",
        StandardTagKey::TrackNumber => "track",
        StandardTagKey::DiscNumber => "disc",
        StandardTagKey::Comment => "comment",
        StandardTagKey::Composer => "composer",
        StandardTagKey::Encoder => "encoder",
        StandardTagKey::ReplayGainTrackGain => "replaygain_track_gain",
        StandardTagKey::ReplayGainTrackPeak => "replaygain_track_peak",
        StandardTagKey::ReplayGainAlbumGain => "replaygain_album_gain",
        StandardTagKey::ReplayGainAlbumPeak => "replaygain_album_peak",
        _ => return None,
    };
    Some(name)
}

fn cue_title(tags: &[Tag]) -> Option<String> {
    tags.iter()
        .find(|t| {
            t.std_key == Some(StandardTagKey::TrackTitle) || t.key.eq_ignore_ascii_case("title")
        })
        .map(|t| t.value.to_string())
}

/// Chapters from ID3v2 `CHAP` frames; empty when the file carries no ID3v2 tag.
fn id3_chapters(path: &Path) -> Vec<RawChapter> {
    let tag = match id3::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(e) => {
            tracing::trace!(path = %path.display(), "no id3 chapters: {e}");
            return Vec::new();
        }
    };
    tag.chapters().map(chapter_from_id3).collect()
}

fn chapter_from_id3(chapter: &id3::frame::Chapter) -> RawChapter {
    let title = chapter
        .frames
        .iter()
        .find(|f| f.id() == "TIT2")
        .and_then(|f| f.content().text())
        .map(str::to_string);
    let end = (chapter.end_time > chapter.start_time)
        .then(|| Duration::from_millis(chapter.end_time as u64));
    RawChapter {
        start: Duration::from_millis(chapter.start_time as u64),
        end,
        title,
    }
}

/// Best-effort codec label for probe output.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
