//! Chapter list normalization and the chapter/seek controller.

use std::time::Duration;

use track_decode_types::ChapterInfo;

use crate::backend::RawChapter;
use crate::error::{DecodeError, Result};

/// One normalized chapter covering `[start, end)`; `end == None` means open-ended.
#[derive(Clone, Debug, PartialEq)]
pub struct Chapter {
    pub index: usize,
    pub start: Duration,
    pub end: Option<Duration>,
    pub title: Option<String>,
}

impl Chapter {
    pub fn contains(&self, pos: Duration) -> bool {
        pos >= self.start && self.end.is_none_or(|end| pos < end)
    }

    pub fn to_info(&self) -> ChapterInfo {
        ChapterInfo {
            index: self.index,
            start_ms: millis(self.start),
            end_ms: self.end.map(millis),
            title: self.title.clone(),
        }
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Chapters ordered by start, with ends consistent with their neighbours.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChapterList {
    chapters: Vec<Chapter>,
}

impl ChapterList {
    /// Normalize chapters read from a container.
    ///
    /// Sorts by start, clamps every end into `[start, next.start]`, fills a missing end with
    /// the next start (or the source duration for the last chapter) and renumbers `0..n`.
    pub fn from_raw(mut raw: Vec<RawChapter>, duration: Option<Duration>) -> Self {
        raw.sort_by_key(|c| c.start);

        let starts: Vec<Duration> = raw.iter().map(|c| c.start).collect();
        let chapters = raw
            .into_iter()
            .enumerate()
            .map(|(index, c)| {
                let next_start = starts.get(index + 1).copied();
                let limit = next_start.or(duration.filter(|d| *d >= c.start));
                let end = match (c.end, limit) {
                    (Some(end), Some(limit)) => Some(end.clamp(c.start, limit)),
                    (Some(end), None) => Some(end.max(c.start)),
                    (None, limit) => limit,
                };
                Chapter {
                    index,
                    start: c.start,
                    end,
                    title: c.title.filter(|t| !t.trim().is_empty()),
                }
            })
            .collect();

        Self { chapters }
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter()
    }

    /// Index of the chapter containing `pos`. The last matching chapter wins when
    /// zero-length chapters share a start.
    pub fn locate(&self, pos: Duration) -> Option<usize> {
        self.chapters
            .iter()
            .rev()
            .find(|c| c.contains(pos))
            .map(|c| c.index)
    }

    pub fn to_info(&self) -> Vec<ChapterInfo> {
        self.chapters.iter().map(Chapter::to_info).collect()
    }
}

/// Seek request accepted by a live session or at session start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekTarget {
    Offset(Duration),
    Chapter(usize),
}

/// Tracks the current chapter and the confine-to-chapter mode for one session.
#[derive(Clone, Debug, Default)]
pub struct ChapterController {
    chapters: ChapterList,
    current: Option<usize>,
    confine: bool,
}

impl ChapterController {
    /// Start positioned at the beginning of the timeline.
    pub fn new(chapters: ChapterList) -> Self {
        let current = chapters.locate(Duration::ZERO);
        Self {
            chapters,
            current,
            confine: false,
        }
    }

    pub fn chapters(&self) -> &ChapterList {
        &self.chapters
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.current.and_then(|i| self.chapters.get(i))
    }

    pub fn is_confined(&self) -> bool {
        self.confine
    }

    pub fn set_confine(&mut self, confine: bool) {
        self.confine = confine;
    }

    /// Resolve a request to a timeline position. Never mutates the current chapter.
    pub fn resolve(&self, target: SeekTarget) -> Result<Duration> {
        match target {
            SeekTarget::Offset(pos) => Ok(pos),
            SeekTarget::Chapter(index) => self
                .chapters
                .get(index)
                .map(|c| c.start)
                .ok_or(DecodeError::InvalidChapter {
                    index,
                    count: self.chapters.len(),
                }),
        }
    }

    /// Re-anchor the current chapter after a successful seek.
    pub fn after_seek(&mut self, pos: Duration) -> Option<usize> {
        self.current = self.chapters.locate(pos);
        self.current
    }

    /// Follow the playback position. Returns the new chapter when it changed.
    ///
    /// While confined the current chapter stays put; the session ends at its boundary.
    pub fn track(&mut self, pos: Duration) -> Option<Option<usize>> {
        if self.confine && self.current.is_some() {
            return None;
        }
        let located = self.chapters.locate(pos);
        if located != self.current {
            self.current = located;
            Some(located)
        } else {
            None
        }
    }

    /// End of the current chapter when confinement applies.
    pub fn confine_end(&self) -> Option<Duration> {
        if !self.confine {
            return None;
        }
        self.current_chapter().and_then(|c| c.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(start: u64, end: Option<u64>, title: &str) -> RawChapter {
        RawChapter {
            start: Duration::from_secs(start),
            end: end.map(Duration::from_secs),
            title: Some(title.to_string()),
        }
    }

    fn three_chapters() -> ChapterList {
        ChapterList::from_raw(
            vec![
                raw(0, Some(60), "A"),
                raw(60, Some(120), "B"),
                raw(120, Some(180), "C"),
            ],
            Some(Duration::from_secs(180)),
        )
    }

    #[test]
    fn from_raw_sorts_and_fills_missing_ends() {
        let list = ChapterList::from_raw(
            vec![raw(120, None, "C"), raw(0, None, "A"), raw(60, None, "B")],
            Some(Duration::from_secs(180)),
        );
        let spans: Vec<_> = list
            .iter()
            .map(|c| (c.index, c.start.as_secs(), c.end.map(|e| e.as_secs())))
            .collect();
        assert_eq!(
            spans,
            vec![(0, 0, Some(60)), (1, 60, Some(120)), (2, 120, Some(180))]
        );
        assert_eq!(list.get(0).unwrap().title.as_deref(), Some("A"));
    }

    #[test]
    fn from_raw_clamps_overlapping_ends() {
        let list = ChapterList::from_raw(
            vec![raw(0, Some(90), "A"), raw(60, Some(50), "B")],
            None,
        );
        assert_eq!(list.get(0).unwrap().end, Some(Duration::from_secs(60)));
        // An end before its own start collapses to the start.
        assert_eq!(list.get(1).unwrap().end, Some(Duration::from_secs(60)));
    }

    #[test]
    fn last_chapter_without_duration_is_open_ended() {
        let list = ChapterList::from_raw(vec![raw(10, None, "A")], None);
        let ch = list.get(0).unwrap();
        assert_eq!(ch.end, None);
        assert!(ch.contains(Duration::from_secs(100_000)));
    }

    #[test]
    fn locate_finds_half_open_ranges() {
        let list = three_chapters();
        assert_eq!(list.locate(Duration::from_secs(0)), Some(0));
        assert_eq!(list.locate(Duration::from_secs(60)), Some(1));
        assert_eq!(list.locate(Duration::from_millis(119_999)), Some(1));
        assert_eq!(list.locate(Duration::from_secs(180)), None);
    }

    #[test]
    fn resolve_rejects_out_of_range_without_mutation() {
        let mut ctl = ChapterController::new(three_chapters());
        ctl.after_seek(Duration::from_secs(70));
        assert_eq!(ctl.current(), Some(1));

        let err = ctl.resolve(SeekTarget::Chapter(3)).unwrap_err();
        assert_eq!(err, DecodeError::InvalidChapter { index: 3, count: 3 });
        assert_eq!(ctl.current(), Some(1));
        assert_eq!(
            ctl.resolve(SeekTarget::Chapter(2)).unwrap(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn track_reports_changes_only() {
        let mut ctl = ChapterController::new(three_chapters());
        assert_eq!(ctl.current(), Some(0));
        assert_eq!(ctl.track(Duration::from_secs(30)), None);
        assert_eq!(ctl.track(Duration::from_secs(61)), Some(Some(1)));
        assert_eq!(ctl.track(Duration::from_secs(62)), None);
    }

    #[test]
    fn confinement_pins_chapter_and_exposes_end() {
        let mut ctl = ChapterController::new(three_chapters());
        ctl.after_seek(Duration::from_secs(60));
        assert_eq!(ctl.confine_end(), None);
        ctl.set_confine(true);
        assert_eq!(ctl.confine_end(), Some(Duration::from_secs(120)));
        assert_eq!(ctl.track(Duration::from_secs(125)), None);
        assert_eq!(ctl.current(), Some(1));
    }

    #[test]
    fn no_chapters_means_no_current() {
        let ctl = ChapterController::new(ChapterList::default());
        assert_eq!(ctl.current(), None);
        assert!(matches!(
            ctl.resolve(SeekTarget::Chapter(0)),
            Err(DecodeError::InvalidChapter { index: 0, count: 0 })
        ));
    }
}
