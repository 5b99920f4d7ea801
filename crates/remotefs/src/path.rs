// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical path values.
//!
//! A [`Path`] is a root-relative sequence of segments. Segments are kept
//! exactly as given: `.` and `..` are ordinary names, whitespace is never
//! trimmed, and case is significant. Character legality at the wire
//! boundary is the codec's business, not this module's.

use crate::error::{Error, Result};
use std::fmt;

const SEPARATOR: char = '/';

/// An immutable, root-relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The implicit root directory.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a `/`-separated path.
    ///
    /// A leading `/` is optional and a single trailing `/` is accepted as
    /// directory intent and dropped. Any other empty segment (`a//b`,
    /// `a/b//`) is rejected.
    pub fn parse<S: AsRef<str>>(path: S) -> Result<Self> {
        let raw = path.as_ref();
        let body = raw.strip_prefix(SEPARATOR).unwrap_or(raw);
        if body.is_empty() {
            return Ok(Self::root());
        }
        let body = body.strip_suffix(SEPARATOR).unwrap_or(body);

        let mut segments = Vec::new();
        for segment in body.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(Error::invalid_path(raw, "empty path segment"));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Builds a path from already-split segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for segment in segments {
            path = path.join(segment)?;
        }
        Ok(path)
    }

    /// Appends one segment. The segment may not be empty or contain the
    /// separator.
    pub fn join<S: Into<String>>(&self, segment: S) -> Result<Self> {
        let segment = segment.into();
        if segment.is_empty() {
            return Err(Error::invalid_path(self.child_display(""), "empty path segment"));
        }
        if segment.contains(SEPARATOR) {
            return Err(Error::invalid_path(
                self.child_display(&segment),
                "segment contains the path separator",
            ));
        }
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final segment, `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The containing directory, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True when `self` equals `other` or lies beneath it.
    #[must_use]
    pub fn starts_with(&self, other: &Path) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// Proper ancestors from the outermost non-root directory down to the
    /// parent. Empty for the root and for top-level entries.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Path> {
        (1..self.segments.len())
            .map(|n| Self {
                segments: self.segments[..n].to_vec(),
            })
            .collect()
    }

    fn child_display(&self, segment: &str) -> String {
        if self.is_root() {
            format!("{SEPARATOR}{segment}")
        } else {
            format!("{self}{SEPARATOR}{segment}")
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "{SEPARATOR}");
        }
        for segment in &self.segments {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_segments_literal() {
        let path = Path::parse("/test/a..b/./../ x ").unwrap();
        assert_eq!(path.segments(), &["test", "a..b", ".", "..", " x "]);
        assert_eq!(path.to_string(), "/test/a..b/./../ x ");
    }

    #[test]
    fn test_parse_root_and_relative() {
        assert!(Path::parse("/").unwrap().is_root());
        assert!(Path::parse("").unwrap().is_root());
        assert_eq!(Path::parse("a/b").unwrap(), Path::parse("/a/b").unwrap());
    }

    #[test]
    fn test_trailing_slash_is_directory_intent() {
        assert_eq!(Path::parse("/a/b/").unwrap(), Path::parse("/a/b").unwrap());
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert_eq!(
            Path::parse("/a//b"),
            Err(Error::invalid_path("/a//b", "empty path segment"))
        );
        assert!(Path::parse("/a/b//").is_err());
        assert!(Path::root().join("").is_err());
    }

    #[test]
    fn test_join_rejects_separator() {
        let err = Path::parse("/a").unwrap().join("b/c").unwrap_err();
        assert_eq!(
            err,
            Error::invalid_path("/a/b/c", "segment contains the path separator")
        );
    }

    #[test]
    fn test_parent_name_and_ancestors() {
        let path = Path::parse("/a/b/c").unwrap();
        assert_eq!(path.name(), Some("c"));
        assert_eq!(path.parent().unwrap(), Path::parse("/a/b").unwrap());
        assert_eq!(
            path.ancestors(),
            vec![Path::parse("/a").unwrap(), Path::parse("/a/b").unwrap()]
        );
        assert_eq!(Path::root().parent(), None);
        assert_eq!(Path::root().name(), None);
        assert!(Path::parse("/top").unwrap().ancestors().is_empty());
    }

    #[test]
    fn test_starts_with() {
        let a = Path::parse("/a").unwrap();
        let ab = Path::parse("/a/b").unwrap();
        let abc = Path::parse("/ab").unwrap();
        assert!(ab.starts_with(&a));
        assert!(a.starts_with(&a));
        assert!(!abc.starts_with(&a));
        assert!(a.starts_with(&Path::root()));
    }
}
