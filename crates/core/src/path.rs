//! Path codec
//!
//! Every stored row is keyed by a path string. This module defines:
//! - The order-preserving array index encoding ([`encode_index`] / [`decode_index`])
//! - Key validation for object field names ([`validate_key`])
//! - [`PathSegment`] and [`JsonPath`]: the parsed form of caller paths such as
//!   `/users/u1000/tags/2`, and their storage prefix form (`/users/u1000/tags/[2/`)
//!
//! # Index encoding
//!
//! Array indices are written as a self-describing length chain so that plain
//! byte comparison orders them numerically without padding:
//!
//! | Index | Encoded |
//! |-------|---------|
//! | 0 | `[0` |
//! | 9 | `[9` |
//! | 10 | `[[210` |
//! | 123 | `[[3123` |
//! | 1234567890 | `[[[2101234567890` |
//!
//! One marker per link of the chain, then the chain from the shortest length
//! to the value itself.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

/// Marker that prefixes every encoded array index segment.
pub const INDEX_MARKER: char = '[';

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Maximum length of an object key, in characters.
pub const MAX_KEY_LENGTH: usize = 768;

// =============================================================================
// Index encoding
// =============================================================================

/// Encode an array index so that `encode_index(a) < encode_index(b)` iff `a < b`.
pub fn encode_index(index: u64) -> String {
    let mut chain = vec![index.to_string()];
    while chain[chain.len() - 1].len() > 1 {
        let len = chain[chain.len() - 1].len().to_string();
        chain.push(len);
    }

    let mut encoded = String::with_capacity(chain.len() * 2 + 20);
    for _ in 0..chain.len() {
        encoded.push(INDEX_MARKER);
    }
    for link in chain.iter().rev() {
        encoded.push_str(link);
    }
    encoded
}

/// Decode a segment produced by [`encode_index`].
///
/// Returns [`Error::Corruption`] if the segment is not a well-formed chain.
pub fn decode_index(segment: &str) -> Result<u64> {
    let corrupt = || Error::Corruption(format!("malformed array index segment '{}'", segment));

    let mut remaining = segment.trim_start_matches(INDEX_MARKER);
    if remaining.len() == segment.len() || remaining.is_empty() {
        return Err(corrupt());
    }

    let mut width: u64 = 1;
    while !remaining.is_empty() {
        let take = usize::try_from(width).map_err(|_| corrupt())?;
        if take == 0 || take > remaining.len() || !remaining.is_char_boundary(take) {
            return Err(corrupt());
        }
        let (link, rest) = remaining.split_at(take);
        if !link.bytes().all(|b| b.is_ascii_digit()) {
            return Err(corrupt());
        }
        width = link.parse::<u64>().map_err(|_| corrupt())?;
        remaining = rest;
    }

    // Only the canonical chain is accepted: marker count and link widths must agree.
    if encode_index(width) != segment {
        return Err(corrupt());
    }
    Ok(width)
}

/// Whether a stored segment is an encoded array index.
pub fn is_index_segment(segment: &str) -> bool {
    segment.starts_with(INDEX_MARKER)
}

// =============================================================================
// Key validation
// =============================================================================

/// Validate an object key.
///
/// Keys may not be empty, may not contain `. % $ # [ ] /` or ASCII control
/// characters (0-31 and 127), and are capped at [`MAX_KEY_LENGTH`] characters.
pub fn validate_key(key: &str) -> Result<&str> {
    if key.is_empty() {
        return Err(Error::invalid_key(key, "key cannot be empty"));
    }
    let reserved = key
        .chars()
        .any(|c| matches!(c, '.' | '%' | '$' | '#' | '[' | ']' | '/' | '\u{0}'..='\u{1f}' | '\u{7f}'));
    if reserved {
        return Err(Error::invalid_key(
            key,
            "cannot contain ., %, $, #, [, ], /, or ASCII control characters 0-31 or 127",
        ));
    }
    if key.chars().count() > MAX_KEY_LENGTH {
        return Err(Error::invalid_key(key, "key cannot be longer than 768 characters"));
    }
    Ok(key)
}

/// Smallest string greater than every string that starts with `key` and
/// continues with a character greater than the last one of `key`.
///
/// Used to turn inclusive/exclusive key bounds into half-open path ranges.
pub fn increment_key(key: &str) -> String {
    let mut chars: Vec<char> = key.chars().collect();
    if let Some(last) = chars.last_mut() {
        let mut next = *last as u32 + 1;
        if (0xD800..0xE000).contains(&next) {
            next = 0xE000;
        }
        match char::from_u32(next) {
            Some(c) => *last = c,
            None => chars.push('\u{0}'),
        }
    }
    chars.into_iter().collect()
}

/// Exclusive upper bound of the half-open range covering every stored path
/// that starts with `prefix`. `prefix` must end with [`SEPARATOR`].
pub fn prefix_upper_bound(prefix: &str) -> String {
    debug_assert!(prefix.ends_with(SEPARATOR));
    let mut upper = prefix[..prefix.len() - 1].to_string();
    // '0' is the character immediately after '/'
    upper.push('0');
    upper
}

// =============================================================================
// PathSegment and JsonPath
// =============================================================================

/// A segment in a document path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object key
    Key(String),
    /// Array index
    Index(u64),
}

impl PathSegment {
    /// Build a validated key segment.
    pub fn key(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(PathSegment::Key(key))
    }

    /// Parse one caller-supplied segment: all-digit segments are array
    /// indices, anything else must be a valid key.
    pub fn parse(raw: &str) -> Result<Self> {
        validate_key(raw)?;
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            let index = raw
                .parse::<u64>()
                .map_err(|_| Error::invalid_key(raw, "array index out of range"))?;
            Ok(PathSegment::Index(index))
        } else {
            Ok(PathSegment::Key(raw.to_string()))
        }
    }

    /// Decode a stored segment back into its logical form.
    pub fn decode(stored: &str) -> Result<Self> {
        if is_index_segment(stored) {
            Ok(PathSegment::Index(decode_index(stored)?))
        } else {
            Ok(PathSegment::Key(stored.to_string()))
        }
    }

    /// Storage form of this segment.
    pub fn encode(&self) -> String {
        match self {
            PathSegment::Key(k) => k.clone(),
            PathSegment::Index(i) => encode_index(*i),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// A path into the logical document tree
///
/// Caller paths are `/`-separated; empty segments are ignored, so `""`, `"/"`
/// and `"//"` all name the root. All-digit segments address array slots.
///
/// # Examples
///
/// ```
/// use jsondb_core::path::JsonPath;
///
/// let path: JsonPath = "/doc/items/2".parse().unwrap();
/// assert_eq!(path.db_prefix(), "/doc/items/[2/");
/// assert_eq!(path.to_string(), "/doc/items/2");
/// assert_eq!(JsonPath::root().db_prefix(), "/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// The root path
    pub fn root() -> Self {
        JsonPath::default()
    }

    /// Parse a caller path, validating every segment.
    pub fn parse(path: &str) -> Result<Self> {
        let segments = path
            .split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(PathSegment::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(JsonPath { segments })
    }

    /// Parse a storage path or prefix (`/a/[0/`) back into a `JsonPath`.
    pub fn from_db_path(stored: &str) -> Result<Self> {
        let segments = stored
            .split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(PathSegment::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(JsonPath { segments })
    }

    /// Append a segment
    pub fn child(mut self, segment: PathSegment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Append a caller-supplied segment (numeric segments become indices).
    pub fn join(&self, raw: &str) -> Result<Self> {
        Ok(self.clone().child(PathSegment::parse(raw)?))
    }

    /// Segments of this path
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the path has no segments (same as [`JsonPath::is_root`])
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parent path, or `None` for the root
    pub fn parent(&self) -> Option<JsonPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(JsonPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Storage prefix: a leading `/`, each encoded segment followed by `/`.
    pub fn db_prefix(&self) -> String {
        let mut prefix = String::from(SEPARATOR);
        for segment in &self.segments {
            prefix.push_str(&segment.encode());
            prefix.push(SEPARATOR);
        }
        prefix
    }

    /// Storage prefixes of every strict ancestor, nearest first, including the root.
    ///
    /// A leaf row stored at any of these would conflict with a subtree written here.
    pub fn ancestor_prefixes(&self) -> Vec<String> {
        let mut prefixes = Vec::with_capacity(self.segments.len());
        let mut current = self.parent();
        while let Some(path) = current {
            prefixes.push(path.db_prefix());
            current = path.parent();
        }
        prefixes
    }
}

impl FromStr for JsonPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JsonPath::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_small_indices() {
        assert_eq!(encode_index(0), "[0");
        assert_eq!(encode_index(9), "[9");
        assert_eq!(encode_index(10), "[[210");
        assert_eq!(encode_index(123), "[[3123");
        assert_eq!(encode_index(1_234_567_890), "[[[2101234567890");
    }

    #[test]
    fn test_decode_inverts_examples() {
        for n in [0u64, 1, 9, 10, 99, 100, 12345, 999_999_999, u64::MAX] {
            assert_eq!(decode_index(&encode_index(n)).unwrap(), n);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_index("abc"), Err(Error::Corruption(_))));
        assert!(matches!(decode_index("["), Err(Error::Corruption(_))));
        assert!(matches!(decode_index("[[9"), Err(Error::Corruption(_))));
        assert!(matches!(decode_index("[x"), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_ordering_across_widths() {
        let mut encoded: Vec<String> = [0u64, 1, 2, 9, 10, 11, 99, 100, 101, 1000]
            .iter()
            .map(|i| encode_index(*i))
            .collect();
        let sorted = {
            let mut s = encoded.clone();
            s.sort();
            s
        };
        assert_eq!(encoded, sorted);
        encoded.reverse();
        assert_ne!(encoded, sorted);
    }

    #[test]
    fn test_validate_key_rejects_reserved_characters() {
        for bad in ["a.b", "a%", "$a", "#", "[x", "x]", "a/b", "tab\t", "del\u{7f}", "nul\u{0}"] {
            assert!(
                matches!(validate_key(bad), Err(Error::InvalidKey { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_key("").is_err());
        assert!(validate_key("hello-world_1 ok").is_ok());
        assert!(validate_key("ünïcödé").is_ok());
    }

    #[test]
    fn test_validate_key_length_cap() {
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH)).is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_parse_path_numeric_segments_become_indices() {
        let path = JsonPath::parse("/users/u1000/tags/2").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("users".into()),
                PathSegment::Key("u1000".into()),
                PathSegment::Key("tags".into()),
                PathSegment::Index(2),
            ]
        );
        assert_eq!(path.db_prefix(), "/users/u1000/tags/[2/");
    }

    #[test]
    fn test_parse_root_variants() {
        for root in ["", "/", "//"] {
            let path = JsonPath::parse(root).unwrap();
            assert!(path.is_root());
            assert_eq!(path.db_prefix(), "/");
            assert_eq!(path.to_string(), "/");
        }
    }

    #[test]
    fn test_parse_rejects_invalid_segment() {
        assert!(JsonPath::parse("/a/b.c").is_err());
        assert!(JsonPath::parse("/a/99999999999999999999999").is_err());
    }

    #[test]
    fn test_display_normalises_slashes() {
        let path = JsonPath::parse("doc//items/0/").unwrap();
        assert_eq!(path.to_string(), "/doc/items/0");
    }

    #[test]
    fn test_from_db_path_round_trip() {
        let path = JsonPath::parse("/a/12/b").unwrap();
        let back = JsonPath::from_db_path(&path.db_prefix()).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_ancestor_prefixes_include_root() {
        let path = JsonPath::parse("/a/b/c").unwrap();
        assert_eq!(path.ancestor_prefixes(), vec!["/a/b/", "/a/", "/"]);
        assert!(JsonPath::root().ancestor_prefixes().is_empty());
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound("/"), "0");
        assert_eq!(prefix_upper_bound("/doc/"), "/doc0");
        assert!("/doc/zzz/" < prefix_upper_bound("/doc/").as_str());
        assert!("/doc0" >= prefix_upper_bound("/doc/").as_str());
    }

    #[test]
    fn test_increment_key() {
        assert_eq!(increment_key("abc"), "abd");
        assert_eq!(increment_key("a"), "b");
        assert_eq!(increment_key(""), "");
    }

    proptest! {
        #[test]
        fn prop_encoding_preserves_order(a in 0u64..1_000_000_000, b in 0u64..1_000_000_000) {
            let (ea, eb) = (encode_index(a), encode_index(b));
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn prop_decode_inverts_encode(n in any::<u64>()) {
            prop_assert_eq!(decode_index(&encode_index(n)).unwrap(), n);
        }

        #[test]
        fn prop_index_segments_sort_inside_paths(a in 0u64..100_000, b in 0u64..100_000) {
            let pa = JsonPath::root().child(PathSegment::Index(a)).db_prefix();
            let pb = JsonPath::root().child(PathSegment::Index(b)).db_prefix();
            prop_assert_eq!(a.cmp(&b), pa.cmp(&pb));
        }
    }
}
