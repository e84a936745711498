//! Shared fixtures for the integration tests: hand-built manifest snapshots
//! with precisely controlled timelines.

#![allow(dead_code)]

use chrono::DateTime;

use nagare::{
    manifest::{
        AdaptationSet, ListAddressing, TemplateAddressing, TimelineAddressing, TimelineSegment,
    },
    template::MediaTemplate,
    ChunkQueueEntry, Format, MediaManifest, Period, RangedUrl, Representation, SegmentAddressing,
    TrackType,
};

pub const US: i64 = 1_000_000;

pub fn format(id: &str, bitrate: u64) -> Format {
    Format {
        id: id.to_string(),
        bitrate,
        codecs: Some("avc1.64001f".to_string()),
        mime_type: Some("video/mp4".to_string()),
        width: Some(1280),
        height: Some(720),
    }
}

/// Explicitly indexed representation: `count` segments of `segment_duration`
/// microseconds starting at `first_time` microseconds (timescale is 1MHz so
/// sample times are microseconds).
pub fn timeline_rep(
    id: &str,
    bitrate: u64,
    start_number: i64,
    first_time_us: i64,
    segment_duration_us: i64,
    count: u64,
) -> Representation {
    let segments = if count == 0 {
        Vec::new()
    } else {
        vec![TimelineSegment {
            time: Some(first_time_us as u64),
            duration: segment_duration_us as u64,
            repeat: count - 1,
        }]
    };
    Representation {
        format: format(id, bitrate),
        init: None,
        addressing: SegmentAddressing::Timeline(TimelineAddressing {
            media: MediaTemplate::new(format!("https://example.com/{id}/seg-$Number$.m4s")),
            start_number,
            timescale: 1_000_000,
            presentation_time_offset: 0,
            segments,
        }),
    }
}

/// Simple-addressed representation: open-ended run of fixed-duration
/// segments, numbering from zero.
pub fn template_rep(id: &str, bitrate: u64, segment_duration_us: i64) -> Representation {
    Representation {
        format: format(id, bitrate),
        init: None,
        addressing: SegmentAddressing::Template(TemplateAddressing {
            media: MediaTemplate::new(format!("https://example.com/{id}/seg-$Number$.m4s")),
            start_number: 0,
            timescale: 1_000_000,
            presentation_time_offset: 0,
            duration: segment_duration_us as u64,
        }),
    }
}

/// Representation whose index must be fetched from the stream.
pub fn indexed_rep(id: &str, bitrate: u64, init: Option<RangedUrl>, index: Option<RangedUrl>) -> Representation {
    Representation {
        format: format(id, bitrate),
        init,
        addressing: SegmentAddressing::Indexed { index },
    }
}

pub fn list_rep(id: &str, bitrate: u64, segment_duration_us: i64, entries: Vec<RangedUrl>) -> Representation {
    Representation {
        format: format(id, bitrate),
        init: None,
        addressing: SegmentAddressing::List(ListAddressing {
            start_number: 1,
            timescale: 1_000_000,
            duration: Some(segment_duration_us as u64),
            entries,
        }),
    }
}

pub fn period(start_us: i64, duration_us: Option<i64>, representations: Vec<Representation>) -> Period {
    Period {
        id: None,
        start_us,
        duration_us,
        adaptation_sets: vec![AdaptationSet {
            track_type: TrackType::Video,
            drm: None,
            representations,
        }],
    }
}

pub fn vod_manifest(periods: Vec<Period>) -> MediaManifest {
    MediaManifest {
        dynamic: false,
        availability_start_time: None,
        publish_time: None,
        time_shift_buffer_depth_us: None,
        min_update_period_us: None,
        suggested_presentation_delay_us: None,
        periods,
    }
}

pub fn live_manifest(periods: Vec<Period>, time_shift_buffer_depth_us: Option<i64>) -> MediaManifest {
    MediaManifest {
        dynamic: true,
        availability_start_time: Some(DateTime::UNIX_EPOCH),
        publish_time: None,
        time_shift_buffer_depth_us,
        min_update_period_us: Some(2 * US),
        suggested_presentation_delay_us: None,
        periods,
    }
}

pub fn entry(
    period_local_id: u64,
    representation_id: &str,
    start_time_us: i64,
    end_time_us: i64,
    next_segment_number: i64,
) -> ChunkQueueEntry {
    ChunkQueueEntry {
        period_local_id,
        representation_id: representation_id.to_string(),
        start_time_us,
        end_time_us,
        next_segment_number,
    }
}
