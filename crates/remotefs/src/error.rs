// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::path::Path;
use crate::store::Verb;

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome classes of a filesystem operation.
///
/// `TransientFailure` only escapes the executor for a non-idempotent call
/// that was proven not to have happened but ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPath,
    NotFound,
    AlreadyExists,
    Conflict,
    TransientFailure,
    Fatal,
    Cancelled,
}

/// Errors surfaced by [`crate::RemoteFS`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Path not found: {0}")]
    NotFound(Path),

    #[error("Entry already exists: {0}")]
    AlreadyExists(Path),

    #[error("Conflict at {path}: {message}")]
    Conflict { path: Path, message: String },

    /// The operation definitely did not take effect and may be re-issued.
    #[error("Transient failure in {verb} {path}: {message}")]
    Transient {
        verb: Verb,
        path: Path,
        message: String,
    },

    #[error("{verb} {path} failed: {message}")]
    Fatal {
        verb: Verb,
        path: Path,
        message: String,
    },

    #[error("Malformed encoded path {encoded:?}: {reason}")]
    Malformed { encoded: String, reason: String },

    #[error("Cancelled before {verb} {path} was sent")]
    Cancelled { verb: Verb, path: Path },
}

impl Error {
    pub fn invalid_path<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(path: &Path) -> Self {
        Error::NotFound(path.clone())
    }

    pub fn already_exists(path: &Path) -> Self {
        Error::AlreadyExists(path.clone())
    }

    pub fn conflict<M: Into<String>>(path: &Path, message: M) -> Self {
        Error::Conflict {
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn transient<M: Into<String>>(verb: Verb, path: &Path, message: M) -> Self {
        Error::Transient {
            verb,
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn fatal<M: Into<String>>(verb: Verb, path: &Path, message: M) -> Self {
        Error::Fatal {
            verb,
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn malformed<E: Into<String>, R: Into<String>>(encoded: E, reason: R) -> Self {
        Error::Malformed {
            encoded: encoded.into(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(verb: Verb, path: &Path) -> Self {
        Error::Cancelled {
            verb,
            path: path.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPath { .. } => ErrorKind::InvalidPath,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Transient { .. } => ErrorKind::TransientFailure,
            Error::Fatal { .. } | Error::Malformed { .. } => ErrorKind::Fatal,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}
