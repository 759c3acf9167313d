//! Error taxonomy for probing and decode sessions.

use thiserror::Error;
use track_decode_types::ErrorKind;

/// Failures surfaced by the probe reader and decode sessions.
///
/// Every variant maps onto one [`ErrorKind`] so the player can tell a finished track from a
/// failed one and pick skip/retry/alert accordingly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cannot open source: {0}")]
    Open(String),

    #[error("no audio stream: {0}")]
    NoAudioStream(String),

    #[error("filter setup failed: {0}")]
    FilterSetup(String),

    #[error("filter processing failed: {0}")]
    FilterRuntime(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("seek failed: {0}")]
    Seek(String),

    #[error("chapter {index} out of range (source has {count} chapters)")]
    InvalidChapter { index: usize, count: usize },

    /// The mixer stopped taking blocks. Sessions end with `EndReason::ConsumerClosed` rather
    /// than reporting this as a failure.
    #[error("downstream consumer closed")]
    ConsumerClosed,
}

impl DecodeError {
    /// Data-only category sent upward in session events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::Open(_) => ErrorKind::Open,
            DecodeError::NoAudioStream(_) => ErrorKind::NoAudioStream,
            DecodeError::FilterSetup(_) => ErrorKind::FilterSetup,
            DecodeError::FilterRuntime(_) => ErrorKind::FilterRuntime,
            DecodeError::Decode(_) => ErrorKind::Decode,
            DecodeError::Seek(_) => ErrorKind::Seek,
            DecodeError::InvalidChapter { .. } => ErrorKind::InvalidChapter,
            DecodeError::ConsumerClosed => ErrorKind::ConsumerClosed,
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(DecodeError::Open("x".into()).kind(), ErrorKind::Open);
        assert_eq!(
            DecodeError::InvalidChapter { index: 4, count: 3 }.kind(),
            ErrorKind::InvalidChapter
        );
        assert_eq!(DecodeError::ConsumerClosed.kind(), ErrorKind::ConsumerClosed);
    }

    #[test]
    fn invalid_chapter_message_names_range() {
        let msg = DecodeError::InvalidChapter { index: 4, count: 3 }.to_string();
        assert_eq!(msg, "chapter 4 out of range (source has 3 chapters)");
    }
}
