//! HTTP/1.1 byte-range parsing for resumable downloads.

/// A resolved byte range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by this range; inclusive bounds, so never
    /// zero.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value for the given total size.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parse a `Range` header against a known total size.
///
/// Supports `bytes=start-`, `bytes=start-end`, and the suffix form
/// `bytes=-n`. Multi-range requests, inverted ranges, and out-of-bounds
/// starts are ignored (None): the caller serves the full object with 200.
pub fn parse_range(header: &str, total: u64) -> Option<ByteRange> {
    if total == 0 {
        return None;
    }

    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        // Multi-range not supported; serve the whole object.
        return None;
    }

    let (start_raw, end_raw) = spec.split_once('-')?;
    let start_raw = start_raw.trim();
    let end_raw = end_raw.trim();

    if start_raw.is_empty() {
        // Suffix form: last N bytes.
        let suffix: u64 = end_raw.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        let start = total.saturating_sub(suffix);
        return Some(ByteRange {
            start,
            end: total - 1,
        });
    }

    let start: u64 = start_raw.parse().ok()?;
    if start >= total {
        return None;
    }

    let end = if end_raw.is_empty() {
        total - 1
    } else {
        let end: u64 = end_raw.parse().ok()?;
        if end < start {
            return None;
        }
        end.min(total - 1)
    };

    Some(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MIB: u64 = 10 * 1024 * 1024;

    #[test]
    fn test_open_ended_range() {
        let range = parse_range("bytes=1048576-", TEN_MIB).unwrap();
        assert_eq!(range.start, 1_048_576);
        assert_eq!(range.end, TEN_MIB - 1);
        assert_eq!(range.len(), 9_437_184);
        assert_eq!(
            range.content_range(TEN_MIB),
            "bytes 1048576-10485759/10485760"
        );
    }

    #[test]
    fn test_bounded_range_clamps_end() {
        let range = parse_range("bytes=0-99", 50).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 49 });
    }

    #[test]
    fn test_suffix_range() {
        let range = parse_range("bytes=-100", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 900, end: 999 });

        // Suffix larger than the object: the whole object.
        let range = parse_range("bytes=-5000", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn test_invalid_ranges_ignored() {
        assert_eq!(parse_range("bytes=500-100", 1000), None); // inverted
        assert_eq!(parse_range("bytes=1000-", 1000), None); // oob start
        assert_eq!(parse_range("bytes=0-10,20-30", 1000), None); // multi-range
        assert_eq!(parse_range("bytes=-0", 1000), None); // empty suffix
        assert_eq!(parse_range("octets=0-10", 1000), None); // wrong unit
        assert_eq!(parse_range("bytes=abc-", 1000), None);
        assert_eq!(parse_range("bytes=0-", 0), None); // empty object
    }
}
