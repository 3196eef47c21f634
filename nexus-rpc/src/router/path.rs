//! Procedure paths
//!
//! A path is the ordered list of router keys leading to a procedure, e.g.
//! `["post", "byId"]`. It is printed and parsed in dotted form (`post.byId`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Longest accepted router key.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Ordered name segments identifying a procedure inside a router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcedurePath(Vec<String>);

impl ProcedurePath {
    /// Build a path from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with `segment` in front.
    pub fn prefixed(&self, segment: &str) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(segment.to_string());
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    /// A new path with `segment` appended.
    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    /// Returns true if `key` may name a router entry.
    ///
    /// Keys are 1 to [`MAX_SEGMENT_LEN`] ASCII letters, digits, `_` or `-`.
    /// The dot is the separator and can never appear inside a key.
    pub fn is_valid_segment(key: &str) -> bool {
        (1..=MAX_SEGMENT_LEN).contains(&key.len())
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }
}

impl fmt::Display for ProcedurePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl From<&str> for ProcedurePath {
    fn from(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::default();
        }
        Self::new(dotted.split('.'))
    }
}

impl From<String> for ProcedurePath {
    fn from(dotted: String) -> Self {
        Self::from(dotted.as_str())
    }
}

impl From<&String> for ProcedurePath {
    fn from(dotted: &String) -> Self {
        Self::from(dotted.as_str())
    }
}

impl From<Vec<String>> for ProcedurePath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<&[&str]> for ProcedurePath {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for ProcedurePath {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl Serialize for ProcedurePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProcedurePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dotted = String::deserialize(deserializer)?;
        Ok(Self::from(dotted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_word_keys_are_valid(key in "[A-Za-z0-9_-]{1,64}") {
            prop_assert!(ProcedurePath::is_valid_segment(&key));
        }

        #[test]
        fn prop_dotted_keys_are_invalid(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let key = format!("{}.{}", a, b);
            prop_assert!(!ProcedurePath::is_valid_segment(&key));
        }
    }

    #[test]
    fn test_segment_length_bounds() {
        assert!(!ProcedurePath::is_valid_segment(""));
        assert!(ProcedurePath::is_valid_segment(&"k".repeat(MAX_SEGMENT_LEN)));
        assert!(!ProcedurePath::is_valid_segment(&"k".repeat(MAX_SEGMENT_LEN + 1)));
        assert!(!ProcedurePath::is_valid_segment("with space"));
        assert!(!ProcedurePath::is_valid_segment("ünïcode"));
    }

    #[test]
    fn test_dotted_round_trip() {
        let path = ProcedurePath::from("post.byId");
        assert_eq!(path.segments(), ["post", "byId"]);
        assert_eq!(path.to_string(), "post.byId");
        assert_eq!(ProcedurePath::from(["post", "byId"]), path);
    }

    #[test]
    fn test_empty_path() {
        let path = ProcedurePath::from("");
        assert!(path.is_empty());
        assert_eq!(path.to_string(), "");
    }

    #[test]
    fn test_prefix_and_join() {
        let path = ProcedurePath::from("byId").prefixed("post");
        assert_eq!(path.to_string(), "post.byId");
        assert_eq!(path.join("comments").len(), 3);
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_value(ProcedurePath::from("a.b")).unwrap();
        assert_eq!(json, serde_json::json!("a.b"));
        let back: ProcedurePath = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 2);
    }
}
