//! Tag/probe reader: container metadata without decoding audio.

use std::collections::BTreeMap;

use track_decode_types::{ProbeResult, StreamFormat};

use crate::backend::{MediaBackend, SourceInfo, SourceRef, StreamInfo, StreamKind};
use crate::chapters::{ChapterList, millis};
use crate::error::{DecodeError, Result};

/// Read duration, tags and chapters of `source`.
///
/// The source handle is closed before returning, on success and on failure.
pub fn probe(backend: &dyn MediaBackend, source: &SourceRef) -> Result<ProbeResult> {
    let demuxer = backend.open(source)?;
    let info = demuxer.info();
    let stream = select_audio_stream(info, None)?;
    let chapters = ChapterList::from_raw(info.chapters.clone(), info.duration);
    let result = describe(info, stream, &chapters);
    drop(demuxer);

    tracing::debug!(
        source = %source,
        tags = result.tags.len(),
        chapters = result.chapters.len(),
        "probed"
    );
    Ok(result)
}

/// Pick the stream a session decodes: `requested` when given, else the first audio stream.
pub fn select_audio_stream(info: &SourceInfo, requested: Option<usize>) -> Result<&StreamInfo> {
    match requested {
        Some(index) => info
            .streams
            .get(index)
            .filter(|s| s.kind == StreamKind::Audio)
            .ok_or_else(|| {
                DecodeError::NoAudioStream(format!(
                    "stream {index} is not an audio stream ({} streams)",
                    info.streams.len()
                ))
            }),
        None => info
            .streams
            .iter()
            .find(|s| s.kind == StreamKind::Audio)
            .ok_or_else(|| {
                DecodeError::NoAudioStream(format!(
                    "none of {} streams carries audio",
                    info.streams.len()
                ))
            }),
    }
}

/// Build the upward-facing summary of an opened source.
pub(crate) fn describe(
    info: &SourceInfo,
    stream: &StreamInfo,
    chapters: &ChapterList,
) -> ProbeResult {
    // Later entries override earlier ones.
    let tags: BTreeMap<String, String> = info.tags.iter().cloned().collect();

    ProbeResult {
        duration_ms: info.duration.map(millis),
        tags,
        chapters: chapters.to_info(),
        stream: Some(StreamFormat {
            index: stream.index,
            codec: stream.codec.clone(),
            sample_rate: stream.format.map(|f| f.sample_rate),
            channels: stream
                .format
                .and_then(|f| u16::try_from(f.channels).ok()),
        }),
    }
}
