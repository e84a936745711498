use url::Url;

use crate::{
    error::{NagareError, NagareResult},
    range::ByteRange,
};

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

pub(crate) fn merge_baseurls(current: &Url, new: &str) -> NagareResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        // Merge the query portion of the current URL (the manifest URL or a
        // BaseURL element) into the joined URL. A query string on the new URL
        // takes precedence.
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// The byte range shall be expressed and formatted as a byte-range-spec as defined in
/// IETF RFC 7233:2014, subclause 2.1. It is restricted to a single expression identifying
/// a contiguous range of bytes.
pub(crate) fn parse_media_range<S>(s: S) -> NagareResult<ByteRange>
where
    S: AsRef<str>,
{
    let (start, end) = s
        .as_ref()
        .split_once('-')
        .ok_or_else(|| NagareError::InvalidManifest("invalid media range".to_string()))?;

    let first_byte_pos = start
        .parse::<u64>()
        .map_err(|_| NagareError::InvalidManifest("invalid media range".to_string()))?;
    let last_byte_pos = end.parse::<u64>().ok();

    Ok(ByteRange {
        offset: first_byte_pos,
        // 0 - 500 means 501 bytes
        length: last_byte_pos.map(|last_byte_pos| last_byte_pos - first_byte_pos + 1),
    })
}
