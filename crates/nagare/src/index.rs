//! Per-representation segment indices.
//!
//! A segment index is a pure mapping between presentation time, segment
//! number and fetchable location for one representation. Times are
//! period-relative microseconds; segment numbers are representation-local
//! (the numbering-continuity shift lives in the timeline layer, not here).
//!
//! An index with an unbounded segment count describes an open-ended sample
//! timeline (template-addressed live content): the availability window must
//! then be derived from the wall clock, never from the index.

use url::Url;

use crate::{
    error::NagareResult,
    manifest::{
        Format, ListAddressing, Representation, SegmentAddressing, TemplateAddressing,
        TimelineAddressing,
    },
    range::{ByteRange, RangedUrl},
    template::{MediaTemplate, TemplateContext},
};

/// Convert timescale units to microseconds.
pub(crate) fn scale_to_us(units: u64, timescale: u64) -> i64 {
    ((units as u128 * 1_000_000) / timescale.max(1) as u128) as i64
}

/// Convert microseconds to timescale units, rounding down.
pub(crate) fn us_to_scale(us: i64, timescale: u64) -> u64 {
    ((us.max(0) as u128 * timescale.max(1) as u128) / 1_000_000) as u64
}

pub trait SegmentIndex: Send + Sync {
    fn first_segment_number(&self) -> i64;

    /// Number of addressable segments, or `None` when the timeline is
    /// open-ended. A bounded period duration may be needed to bound a
    /// template-addressed sequence.
    fn segment_count(&self, period_duration_us: Option<i64>) -> Option<u64>;

    fn last_segment_number(&self, period_duration_us: Option<i64>) -> Option<i64> {
        self.segment_count(period_duration_us)
            .map(|count| self.first_segment_number() + count as i64 - 1)
    }

    /// Segment number containing `time_us`, clamped into the addressable
    /// range.
    fn segment_number_at(&self, time_us: i64, period_duration_us: Option<i64>) -> i64;

    fn start_time_us(&self, number: i64) -> i64;

    fn duration_us(&self, number: i64, period_duration_us: Option<i64>) -> i64;

    fn location(&self, number: i64) -> NagareResult<RangedUrl>;

    /// Whether the index explicitly describes the end of the timeline. A
    /// non-explicit index derives segment numbers from arithmetic and cannot
    /// carry numbering across a manifest refresh.
    fn is_explicit(&self) -> bool;
}

/// Index declared by the manifest for `representation`, when one is declared
/// at all. Indexed addressing returns `None`: its index must be fetched from
/// the stream and attached later.
pub(crate) fn declared_index(representation: &Representation) -> Option<Box<dyn SegmentIndex>> {
    match &representation.addressing {
        SegmentAddressing::Timeline(a) => Some(Box::new(TimelineIndex::from_addressing(
            a,
            &representation.format,
        ))),
        SegmentAddressing::Template(a) => Some(Box::new(TemplateIndex::from_addressing(
            a,
            &representation.format,
        ))),
        SegmentAddressing::List(a) => Some(Box::new(ListIndex::from_addressing(a))),
        SegmentAddressing::Indexed { .. } => None,
    }
}

/// Explicit addressing: every segment's time span is described by the
/// manifest's segment timeline.
pub struct TimelineIndex {
    media: MediaTemplate,
    representation_id: String,
    bandwidth: u64,
    start_number: i64,
    entries: Vec<TimelineEntry>,
}

#[derive(Debug, Clone)]
struct TimelineEntry {
    start_us: i64,
    duration_us: i64,
    /// Raw sample-timeline value for `$Time$` substitution.
    time_units: u64,
}

impl TimelineIndex {
    pub(crate) fn from_addressing(addressing: &TimelineAddressing, format: &Format) -> Self {
        let pto_us = scale_to_us(addressing.presentation_time_offset, addressing.timescale);
        let mut time = addressing
            .segments
            .first()
            .and_then(|segment| segment.time)
            .unwrap_or(0);

        let mut entries = Vec::new();
        for segment in &addressing.segments {
            if let Some(t) = segment.time {
                time = t;
            }
            // Only additional references are counted by the repeat value, so
            // repeat = 5 yields 6 consecutive segments.
            for _ in 0..=segment.repeat {
                entries.push(TimelineEntry {
                    start_us: scale_to_us(time, addressing.timescale) - pto_us,
                    duration_us: scale_to_us(segment.duration, addressing.timescale),
                    time_units: time,
                });
                time += segment.duration;
            }
        }

        Self {
            media: addressing.media.clone(),
            representation_id: format.id.clone(),
            bandwidth: format.bitrate,
            start_number: addressing.start_number,
            entries,
        }
    }

    fn entry(&self, number: i64) -> &TimelineEntry {
        &self.entries[(number - self.start_number) as usize]
    }
}

impl SegmentIndex for TimelineIndex {
    fn first_segment_number(&self) -> i64 {
        self.start_number
    }

    fn segment_count(&self, _period_duration_us: Option<i64>) -> Option<u64> {
        Some(self.entries.len() as u64)
    }

    fn segment_number_at(&self, time_us: i64, _period_duration_us: Option<i64>) -> i64 {
        let following = self
            .entries
            .partition_point(|entry| entry.start_us <= time_us);
        self.start_number + following.saturating_sub(1) as i64
    }

    fn start_time_us(&self, number: i64) -> i64 {
        self.entry(number).start_us
    }

    fn duration_us(&self, number: i64, _period_duration_us: Option<i64>) -> i64 {
        self.entry(number).duration_us
    }

    fn location(&self, number: i64) -> NagareResult<RangedUrl> {
        let context = TemplateContext::for_representation(
            Some(&self.representation_id),
            self.bandwidth,
        )
        .with_number(number)
        .with_time(self.entry(number).time_units);
        let url = Url::parse(&self.media.resolve(&context))?;
        Ok(RangedUrl::new(url, None))
    }

    fn is_explicit(&self) -> bool {
        true
    }
}

/// Simple addressing: a fixed nominal segment duration, open-ended until a
/// period duration bounds it.
pub struct TemplateIndex {
    media: MediaTemplate,
    representation_id: String,
    bandwidth: u64,
    start_number: i64,
    timescale: u64,
    duration_units: u64,
}

impl TemplateIndex {
    pub(crate) fn from_addressing(addressing: &TemplateAddressing, format: &Format) -> Self {
        Self {
            media: addressing.media.clone(),
            representation_id: format.id.clone(),
            bandwidth: format.bitrate,
            start_number: addressing.start_number,
            timescale: addressing.timescale,
            duration_units: addressing.duration,
        }
    }

    fn segment_duration_us(&self) -> i64 {
        scale_to_us(self.duration_units, self.timescale).max(1)
    }
}

impl SegmentIndex for TemplateIndex {
    fn first_segment_number(&self) -> i64 {
        self.start_number
    }

    fn segment_count(&self, period_duration_us: Option<i64>) -> Option<u64> {
        let duration = self.segment_duration_us();
        period_duration_us.map(|period| {
            if period <= 0 {
                0
            } else {
                ((period + duration - 1) / duration) as u64
            }
        })
    }

    fn segment_number_at(&self, time_us: i64, period_duration_us: Option<i64>) -> i64 {
        let number = self.start_number + time_us.max(0) / self.segment_duration_us();
        match self.last_segment_number(period_duration_us) {
            Some(last) => number.clamp(self.start_number, last.max(self.start_number)),
            None => number,
        }
    }

    fn start_time_us(&self, number: i64) -> i64 {
        ((number - self.start_number) as i128 * self.duration_units as i128 * 1_000_000
            / self.timescale.max(1) as i128) as i64
    }

    fn duration_us(&self, number: i64, period_duration_us: Option<i64>) -> i64 {
        let duration = self.segment_duration_us();
        match period_duration_us {
            // The last segment may be truncated by the period end.
            Some(period) => duration.min(period - self.start_time_us(number)).max(0),
            None => duration,
        }
    }

    fn location(&self, number: i64) -> NagareResult<RangedUrl> {
        let time_units = (number - self.start_number).max(0) as u64 * self.duration_units;
        let context = TemplateContext::for_representation(
            Some(&self.representation_id),
            self.bandwidth,
        )
        .with_number(number)
        .with_time(time_units);
        let url = Url::parse(&self.media.resolve(&context))?;
        Ok(RangedUrl::new(url, None))
    }

    fn is_explicit(&self) -> bool {
        false
    }
}

/// Explicitly listed segment URLs with a uniform nominal duration.
pub struct ListIndex {
    start_number: i64,
    duration_us: Option<i64>,
    entries: Vec<RangedUrl>,
}

impl ListIndex {
    pub(crate) fn from_addressing(addressing: &ListAddressing) -> Self {
        Self {
            start_number: addressing.start_number,
            duration_us: addressing
                .duration
                .map(|duration| scale_to_us(duration, addressing.timescale)),
            entries: addressing.entries.clone(),
        }
    }
}

impl SegmentIndex for ListIndex {
    fn first_segment_number(&self) -> i64 {
        self.start_number
    }

    fn segment_count(&self, _period_duration_us: Option<i64>) -> Option<u64> {
        Some(self.entries.len() as u64)
    }

    fn segment_number_at(&self, time_us: i64, _period_duration_us: Option<i64>) -> i64 {
        match self.duration_us {
            Some(duration) if duration > 0 && !self.entries.is_empty() => {
                let number = self.start_number + time_us.max(0) / duration;
                number.min(self.start_number + self.entries.len() as i64 - 1)
            }
            _ => self.start_number,
        }
    }

    fn start_time_us(&self, number: i64) -> i64 {
        (number - self.start_number) * self.duration_us.unwrap_or(0)
    }

    fn duration_us(&self, number: i64, period_duration_us: Option<i64>) -> i64 {
        match self.duration_us {
            Some(duration) => duration,
            // A single unlabelled entry spans the whole period.
            None => period_duration_us.unwrap_or(0) - self.start_time_us(number),
        }
    }

    fn location(&self, number: i64) -> NagareResult<RangedUrl> {
        Ok(self.entries[(number - self.start_number) as usize].clone())
    }

    fn is_explicit(&self) -> bool {
        true
    }
}

/// One row of a stream-declared index: time span plus byte span inside a
/// single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangedEntry {
    pub start_us: i64,
    pub duration_us: i64,
    pub offset: u64,
    pub length: u64,
}

/// Index recovered from the stream itself (a container seek table such as an
/// fMP4 `sidx`), produced by the external loader and attached after an
/// init/index fetch.
pub struct RangedIndex {
    url: Url,
    first_segment_number: i64,
    entries: Vec<RangedEntry>,
}

impl RangedIndex {
    pub fn new(url: Url, entries: Vec<RangedEntry>) -> Self {
        Self { url, first_segment_number: 0, entries }
    }

    fn entry(&self, number: i64) -> &RangedEntry {
        &self.entries[(number - self.first_segment_number) as usize]
    }
}

impl SegmentIndex for RangedIndex {
    fn first_segment_number(&self) -> i64 {
        self.first_segment_number
    }

    fn segment_count(&self, _period_duration_us: Option<i64>) -> Option<u64> {
        Some(self.entries.len() as u64)
    }

    fn segment_number_at(&self, time_us: i64, _period_duration_us: Option<i64>) -> i64 {
        let following = self
            .entries
            .partition_point(|entry| entry.start_us <= time_us);
        self.first_segment_number + following.saturating_sub(1) as i64
    }

    fn start_time_us(&self, number: i64) -> i64 {
        self.entry(number).start_us
    }

    fn duration_us(&self, number: i64, _period_duration_us: Option<i64>) -> i64 {
        self.entry(number).duration_us
    }

    fn location(&self, number: i64) -> NagareResult<RangedUrl> {
        let entry = self.entry(number);
        Ok(RangedUrl::new(
            self.url.clone(),
            Some(ByteRange::new(entry.offset, Some(entry.length))),
        ))
    }

    fn is_explicit(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::TimelineSegment;

    fn format() -> Format {
        Format {
            id: "v1".to_string(),
            bitrate: 1_000_000,
            codecs: Some("avc1.64001f".to_string()),
            mime_type: Some("video/mp4".to_string()),
            width: Some(1280),
            height: Some(720),
        }
    }

    fn timeline_index() -> TimelineIndex {
        // 4 x 5s segments: one explicit entry followed by three repeats.
        TimelineIndex::from_addressing(
            &TimelineAddressing {
                media: MediaTemplate::new(
                    "https://example.com/$RepresentationID$/seg-$Time$.m4s",
                ),
                start_number: 0,
                timescale: 1000,
                presentation_time_offset: 0,
                segments: vec![TimelineSegment { time: Some(0), duration: 5000, repeat: 3 }],
            },
            &format(),
        )
    }

    #[test]
    fn test_timeline_expansion() {
        let index = timeline_index();
        assert_eq!(index.segment_count(None), Some(4));
        assert_eq!(index.first_segment_number(), 0);
        assert_eq!(index.last_segment_number(None), Some(3));
        assert_eq!(index.start_time_us(2), 10_000_000);
        assert_eq!(index.duration_us(2, None), 5_000_000);
    }

    #[test]
    fn test_timeline_segment_number_at_clamps() {
        let index = timeline_index();
        assert_eq!(index.segment_number_at(-1, None), 0);
        assert_eq!(index.segment_number_at(0, None), 0);
        assert_eq!(index.segment_number_at(7_500_000, None), 1);
        assert_eq!(index.segment_number_at(60_000_000, None), 3);
    }

    #[test]
    fn test_timeline_location_substitutes_time() {
        let index = timeline_index();
        let location = index.location(1).unwrap();
        assert_eq!(location.url.as_str(), "https://example.com/v1/seg-5000.m4s");
        assert_eq!(location.range, None);
    }

    #[test]
    fn test_timeline_presentation_time_offset() {
        let index = TimelineIndex::from_addressing(
            &TimelineAddressing {
                media: MediaTemplate::new("https://example.com/seg-$Number$.m4s"),
                start_number: 10,
                timescale: 1000,
                presentation_time_offset: 2000,
                segments: vec![TimelineSegment { time: Some(2000), duration: 1000, repeat: 1 }],
            },
            &format(),
        );
        // Sample time 2000 maps to the period start point.
        assert_eq!(index.start_time_us(10), 0);
        assert_eq!(index.start_time_us(11), 1_000_000);
    }

    fn template_index() -> TemplateIndex {
        TemplateIndex::from_addressing(
            &TemplateAddressing {
                media: MediaTemplate::new("https://example.com/seg-$Number$.m4s"),
                start_number: 1,
                timescale: 1000,
                presentation_time_offset: 0,
                duration: 2000,
            },
            &format(),
        )
    }

    #[test]
    fn test_template_unbounded_without_period_duration() {
        let index = template_index();
        assert_eq!(index.segment_count(None), None);
        assert_eq!(index.last_segment_number(None), None);
        assert_eq!(index.segment_number_at(9_000_000, None), 5);
    }

    #[test]
    fn test_template_bounded_by_period_duration() {
        let index = template_index();
        // 7s period of 2s segments: 4 segments, last truncated to 1s.
        assert_eq!(index.segment_count(Some(7_000_000)), Some(4));
        assert_eq!(index.last_segment_number(Some(7_000_000)), Some(4));
        assert_eq!(index.duration_us(4, Some(7_000_000)), 1_000_000);
        assert_eq!(index.segment_number_at(100_000_000, Some(7_000_000)), 4);
    }

    #[test]
    fn test_template_location_number_and_time() {
        let index = template_index();
        let location = index.location(3).unwrap();
        assert_eq!(location.url.as_str(), "https://example.com/seg-3.m4s");
    }

    #[test]
    fn test_ranged_index() {
        let index = RangedIndex::new(
            Url::parse("https://example.com/track.mp4").unwrap(),
            vec![
                RangedEntry { start_us: 0, duration_us: 2_000_000, offset: 800, length: 1000 },
                RangedEntry { start_us: 2_000_000, duration_us: 2_000_000, offset: 1800, length: 1200 },
            ],
        );
        assert_eq!(index.segment_count(None), Some(2));
        assert_eq!(index.segment_number_at(3_000_000, None), 1);
        let location = index.location(1).unwrap();
        assert_eq!(location.range, Some(ByteRange::new(1800, Some(1200))));
        assert!(index.is_explicit());
    }
}
