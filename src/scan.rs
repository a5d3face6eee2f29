//! Binary-safe byte-pattern search.
//!
//! Containers like JPEG and EPS mix text tokens with arbitrary binary data, so
//! all token lookups go through these helpers instead of decoding to `str`.

/// Find the first occurrence of `pattern` in `haystack`.
///
/// With `limit`, only matches lying entirely inside `haystack[..limit]` are
/// reported. An empty pattern never matches.
///
/// ```rust
/// use stockmeta::scan::find;
///
/// let data = b"\xC5\xD0%!PS-Adobe-3.0 EPSF-3.0\n";
/// assert_eq!(find(data, b"%!PS-Adobe", None), Some(2));
/// assert_eq!(find(data, b"EPSF", Some(8)), None);
/// ```
pub fn find(haystack: &[u8], pattern: &[u8], limit: Option<usize>) -> Option<usize> {
    let end = limit.map_or(haystack.len(), |l| l.min(haystack.len()));
    find_in(&haystack[..end], pattern)
}

/// Find the first occurrence of `pattern` at or after `from`.
pub fn find_from(haystack: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    find_in(&haystack[from..], pattern).map(|i| i + from)
}

/// Find the last occurrence of `pattern` in `haystack`.
pub fn rfind(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > haystack.len() {
        return None;
    }
    haystack.windows(pattern.len()).rposition(|w| w == pattern)
}

fn find_in(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > haystack.len() {
        return None;
    }
    haystack.windows(pattern.len()).position(|w| w == pattern)
}
