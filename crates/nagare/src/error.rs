use thiserror::Error;

use crate::manifest::TrackType;

/// Engine errors. Expected protocol conditions (a stale refresh, a live
/// window that has not advanced yet) are typed return values elsewhere, not
/// errors. `Clone` so a latched fatal error can be surfaced again on later
/// scheduling calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NagareError {
    /// Required media has aged out of the retained live window. Fatal; the
    /// scheduler latches it until an explicit reset.
    #[error("playback position fell behind the retained live window")]
    BehindLiveWindow,

    #[error("no matching adaptation set for track type {0:?}")]
    MissingAdaptationSet(TrackType),

    #[error("representation {representation} missing in period {period}")]
    MissingRepresentation { period: u64, representation: String },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("failed to parse MPD: {0}")]
    MpdParse(String),

    #[error("scheduler has no prepared timeline")]
    NotPrepared,

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
}

pub type NagareResult<T> = Result<T, NagareError>;
