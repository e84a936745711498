use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset, when the range is bounded.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|length| self.offset + length)
    }

    pub fn to_http_range(&self) -> String {
        if let Some(length) = self.length {
            format!("bytes={}-{}", self.offset, self.offset + length - 1)
        } else {
            format!("bytes={}-", self.offset)
        }
    }
}

/// A fetchable resource location: URL plus optional byte range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangedUrl {
    pub url: Url,
    pub range: Option<ByteRange>,
}

impl RangedUrl {
    pub fn new(url: Url, range: Option<ByteRange>) -> Self {
        Self { url, range }
    }

    /// Merge two locations into a single request when they address the same
    /// URL and their byte ranges are contiguous, in either order. Used to
    /// coalesce adjoining initialization and index ranges into one fetch.
    pub fn merge_adjoining(&self, other: &RangedUrl) -> Option<RangedUrl> {
        if self.url != other.url {
            return None;
        }
        let a = self.range.as_ref()?;
        let b = other.range.as_ref()?;
        join_ranges(a, b)
            .or_else(|| join_ranges(b, a))
            .map(|range| RangedUrl::new(self.url.clone(), Some(range)))
    }
}

/// `second` must start exactly where `first` ends.
fn join_ranges(first: &ByteRange, second: &ByteRange) -> Option<ByteRange> {
    let first_length = first.length?;
    if first.offset + first_length == second.offset {
        Some(ByteRange::new(
            first.offset,
            second.length.map(|length| first_length + length),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/video/1080p.mp4").unwrap()
    }

    #[test]
    fn test_to_http_range() {
        let range = ByteRange::new(10, Some(10));
        assert_eq!(range.to_http_range(), "bytes=10-19");

        let range = ByteRange::new(10, None);
        assert_eq!(range.to_http_range(), "bytes=10-");
    }

    #[test]
    fn test_merge_adjoining() {
        let init = RangedUrl::new(url(), Some(ByteRange::new(0, Some(100))));
        let index = RangedUrl::new(url(), Some(ByteRange::new(100, Some(50))));

        let merged = init.merge_adjoining(&index).unwrap();
        assert_eq!(merged.range, Some(ByteRange::new(0, Some(150))));

        // order-insensitive
        let merged = index.merge_adjoining(&init).unwrap();
        assert_eq!(merged.range, Some(ByteRange::new(0, Some(150))));
    }

    #[test]
    fn test_merge_adjoining_open_ended_tail() {
        let init = RangedUrl::new(url(), Some(ByteRange::new(0, Some(100))));
        let rest = RangedUrl::new(url(), Some(ByteRange::new(100, None)));

        let merged = init.merge_adjoining(&rest).unwrap();
        assert_eq!(merged.range, Some(ByteRange::new(0, None)));
    }

    #[test]
    fn test_merge_rejects_gaps_and_foreign_urls() {
        let init = RangedUrl::new(url(), Some(ByteRange::new(0, Some(100))));
        let gap = RangedUrl::new(url(), Some(ByteRange::new(101, Some(50))));
        assert!(init.merge_adjoining(&gap).is_none());

        let other = RangedUrl::new(
            Url::parse("https://example.com/other.mp4").unwrap(),
            Some(ByteRange::new(100, Some(50))),
        );
        assert!(init.merge_adjoining(&other).is_none());
    }
}
