//! Manifest object model consumed by the engine.
//!
//! The model is the parsed, resolved form of a DASH-style manifest snapshot:
//! ordered periods mapping data onto the presentation timeline, each with
//! adaptation sets of mutually substitutable representations. XML parsing
//! itself is delegated to [`dash_mpd`]; see [`mpd`] for the conversion.
//!
//! All timeline values in this module are microseconds. Period starts are
//! offsets from the presentation's zero point (the effective availability
//! start time for dynamic presentations).

pub mod mpd;
pub(crate) mod url;

use chrono::{DateTime, Utc};

use crate::{
    range::RangedUrl,
    template::MediaTemplate,
};

/// Top-level media type from [RFC6838](https://datatracker.ietf.org/doc/html/rfc6838#section-4.2),
/// used to match adaptation sets against the track selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
    Video,
    Text,
    Image,
    Application,
    Unknown,
}

impl TrackType {
    pub fn from_mime_type(mime_type: Option<&str>) -> Self {
        let Some(mime_type) = mime_type else {
            return Self::Unknown;
        };
        if mime_type.starts_with("video") {
            Self::Video
        } else if mime_type.starts_with("audio") {
            Self::Audio
        } else if mime_type.starts_with("text") {
            Self::Text
        } else if mime_type.starts_with("image") {
            Self::Image
        } else if mime_type.starts_with("application") {
            Self::Application
        } else {
            Self::Unknown
        }
    }
}

/// One encoded bitstream variant of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    pub id: String,
    /// Bits per second as advertised by the manifest.
    pub bitrate: u64,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
}

/// Container format of a representation's segments, as far as it is known
/// before the demuxer has seen actual bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFormat {
    Fmp4,
    WebM,
    Mpeg2Ts,
    Other(String),
}

impl ContainerFormat {
    pub fn from_mime_type(mime_type: &str) -> Self {
        let subtype = mime_type.split_once('/').map(|(_, s)| s).unwrap_or(mime_type);
        match subtype {
            "mp4" | "iso.segment" => Self::Fmp4,
            "webm" => Self::WebM,
            "mp2t" => Self::Mpeg2Ts,
            _ => Self::Other(mime_type.to_string()),
        }
    }
}

/// Opaque DRM initialization payload. Key acquisition is external; the engine
/// only carries the data to whoever needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmInitData {
    pub scheme_id_uri: String,
    /// Base64 `cenc:pssh` payload when the manifest carried one.
    pub pssh: Option<String>,
}

/// One `S` element of an explicit segment timeline, repeats already resolved
/// to a concrete count.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSegment {
    /// Start on the sample timeline, in timescale units. `None` continues
    /// from the previous segment's end.
    pub time: Option<u64>,
    pub duration: u64,
    /// Additional consecutive segments with the same duration.
    pub repeat: u64,
}

/// Explicit addressing: a template with a fully described sample timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineAddressing {
    pub media: MediaTemplate,
    pub start_number: i64,
    pub timescale: u64,
    pub presentation_time_offset: u64,
    pub segments: Vec<TimelineSegment>,
}

/// Simple addressing: a template with a fixed nominal segment duration. The
/// segment sequence is open-ended until a period duration bounds it.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateAddressing {
    pub media: MediaTemplate,
    pub start_number: i64,
    pub timescale: u64,
    pub presentation_time_offset: u64,
    /// Per-segment duration in timescale units.
    pub duration: u64,
}

/// Explicitly listed segment URLs, optionally byte-ranged.
#[derive(Debug, Clone, PartialEq)]
pub struct ListAddressing {
    pub start_number: i64,
    pub timescale: u64,
    /// Uniform per-segment duration in timescale units, when advertised.
    pub duration: Option<u64>,
    pub entries: Vec<RangedUrl>,
}

/// How a representation's media segments are located.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentAddressing {
    Timeline(TimelineAddressing),
    Template(TemplateAddressing),
    List(ListAddressing),
    /// Indexed addressing: the segment index lives in the stream itself
    /// (a container seek table) and must be fetched before media requests
    /// can be formed.
    Indexed {
        /// Location of the index data, when the manifest declares one.
        index: Option<RangedUrl>,
    },
}

/// Immutable per-snapshot description of one representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub format: Format,
    /// Initialization segment location, when separate from media.
    pub init: Option<RangedUrl>,
    pub addressing: SegmentAddressing,
}

impl Representation {
    pub(crate) fn index_location(&self) -> Option<&RangedUrl> {
        match &self.addressing {
            SegmentAddressing::Indexed { index } => index.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationSet {
    pub track_type: TrackType,
    pub drm: Option<DrmInitData>,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub id: Option<String>,
    /// Offset from the presentation zero point.
    pub start_us: i64,
    /// `None` for the open-ended last period of a dynamic presentation.
    pub duration_us: Option<i64>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Period {
    pub fn end_us(&self) -> Option<i64> {
        self.duration_us.map(|duration| self.start_us + duration)
    }
}

/// One manifest snapshot, ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaManifest {
    pub dynamic: bool,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub publish_time: Option<DateTime<Utc>>,
    pub time_shift_buffer_depth_us: Option<i64>,
    pub min_update_period_us: Option<i64>,
    pub suggested_presentation_delay_us: Option<i64>,
    pub periods: Vec<Period>,
}

/// Which representations of a period are eligible for scheduling. Produced by
/// upstream track selection; the engine only consumes its output.
#[derive(Debug, Clone)]
pub struct TrackSelection {
    pub track_type: TrackType,
    pub mode: SelectionMode,
}

#[derive(Debug, Clone)]
pub enum SelectionMode {
    /// Every representation of the matched adaptation set.
    All,
    /// A single pinned representation.
    Fixed(String),
    /// An ordered, pre-validated adaptive set.
    Adaptive(Vec<String>),
}

impl TrackSelection {
    pub fn video() -> Self {
        Self { track_type: TrackType::Video, mode: SelectionMode::All }
    }

    pub fn audio() -> Self {
        Self { track_type: TrackType::Audio, mode: SelectionMode::All }
    }

    pub fn fixed(track_type: TrackType, representation_id: impl Into<String>) -> Self {
        Self { track_type, mode: SelectionMode::Fixed(representation_id.into()) }
    }

    pub fn adaptive(track_type: TrackType, representation_ids: Vec<String>) -> Self {
        Self { track_type, mode: SelectionMode::Adaptive(representation_ids) }
    }

    /// Eligible representations of `set`, in selection order.
    pub(crate) fn filter<'a>(&self, set: &'a AdaptationSet) -> Vec<&'a Representation> {
        match &self.mode {
            SelectionMode::All => set.representations.iter().collect(),
            SelectionMode::Fixed(id) => set
                .representations
                .iter()
                .filter(|r| &r.format.id == id)
                .collect(),
            SelectionMode::Adaptive(ids) => ids
                .iter()
                .filter_map(|id| set.representations.iter().find(|r| &r.format.id == id))
                .collect(),
        }
    }
}
