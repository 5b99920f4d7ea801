// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Path ⇄ wire string mapping.
//!
//! Each segment is percent-escaped over its UTF-8 bytes. Only ASCII
//! alphanumerics and `-` `_` `.` `~` travel verbatim; everything else,
//! including `%`, space, controls and every non-ASCII byte, becomes `%XX`.
//! Segments made only of dots are escaped completely so HTTP dot-segment
//! removal on the request line can never collapse them.
//!
//! The codec refuses a fixed set of characters ([`DISALLOWED`]) that the
//! remote service treats as structure. Nothing else is refused.

use crate::error::{Error, Result};
use crate::path::Path;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::fmt;

/// Characters that may not appear inside a segment.
pub const DISALLOWED: &[char] = &['/', '\\', ':', '\0'];

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const DOT_ESCAPE: &str = "%2E";

/// Wire-safe form of a [`Path`]: `/` followed by escaped segments joined
/// with `/`. The root is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedPath(String);

impl EncodedPath {
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Wraps a string received from the remote store. No validation happens
    /// here; [`PathCodec::decode`] checks it.
    pub fn from_wire<S: Into<String>>(wire: S) -> Self {
        Self(wire.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The encoded parent. Escaped segments never contain a raw `/`, so
    /// this is a plain string split.
    #[must_use]
    pub fn parent(&self) -> Option<EncodedPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some(("", _)) => Some(Self::root()),
            Some((parent, _)) => Some(Self(parent.to_string())),
            None => None,
        }
    }

    /// True when `self` lies strictly beneath `ancestor`.
    #[must_use]
    pub fn is_within(&self, ancestor: &EncodedPath) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.0
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Replaces the `from` prefix with `to`. Used when a subtree moves.
    #[must_use]
    pub fn rebase(&self, from: &EncodedPath, to: &EncodedPath) -> Option<EncodedPath> {
        if self == from {
            return Some(to.clone());
        }
        if !self.is_within(from) {
            return None;
        }
        let rest = if from.is_root() {
            &self.0[..]
        } else {
            &self.0[from.0.len()..]
        };
        if to.is_root() {
            Some(Self(rest.to_string()))
        } else {
            Some(Self(format!("{}{rest}", to.0)))
        }
    }
}

impl fmt::Display for EncodedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stateless codec between [`Path`] and [`EncodedPath`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PathCodec;

impl PathCodec {
    pub fn encode(&self, path: &Path) -> Result<EncodedPath> {
        if path.is_root() {
            return Ok(EncodedPath::root());
        }
        let mut wire = String::new();
        for segment in path.segments() {
            check_segment(segment).map_err(|reason| Error::invalid_path(path.to_string(), reason))?;
            wire.push('/');
            wire.push_str(&self.encode_segment(segment));
        }
        Ok(EncodedPath(wire))
    }

    pub fn decode(&self, encoded: &EncodedPath) -> Result<Path> {
        let wire = encoded.as_str();
        let Some(body) = wire.strip_prefix('/') else {
            return Err(Error::malformed(wire, "encoded path is not absolute"));
        };
        if body.is_empty() {
            return Ok(Path::root());
        }
        let mut segments = Vec::new();
        for raw in body.split('/') {
            segments.push(self.decode_segment(raw).map_err(|reason| Error::malformed(wire, reason))?);
        }
        Path::from_segments(segments).map_err(|e| Error::malformed(wire, e.to_string()))
    }

    /// Escapes one segment. The caller has already checked legality.
    #[must_use]
    pub fn encode_segment(&self, segment: &str) -> String {
        if segment.chars().all(|c| c == '.') {
            return DOT_ESCAPE.repeat(segment.len());
        }
        utf8_percent_encode(segment, SEGMENT).to_string()
    }

    fn decode_segment(&self, raw: &str) -> std::result::Result<String, String> {
        if raw.is_empty() {
            return Err("empty segment".to_string());
        }
        check_escapes(raw)?;
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|e| format!("segment is not UTF-8: {e}"))?;
        check_segment(&decoded)?;
        Ok(decoded.into_owned())
    }
}

fn check_segment(segment: &str) -> std::result::Result<(), String> {
    if segment.is_empty() {
        return Err("empty path segment".to_string());
    }
    match segment.chars().find(|c| DISALLOWED.contains(c)) {
        Some(c) => Err(format!("segment {segment:?} contains disallowed character {c:?}")),
        None => Ok(()),
    }
}

// percent_decode passes broken escapes through untouched; the store must
// not send them.
fn check_escapes(raw: &str) -> std::result::Result<(), String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(format!("broken escape at byte {i}"));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}
