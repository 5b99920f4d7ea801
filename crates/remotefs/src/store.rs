// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::codec::EncodedPath;
use crate::path::Path;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The single-path verbs a remote store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    CreatePath,
    GetStatus,
    DeletePath,
    RenamePath,
    ListChildren,
}

impl Verb {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::CreatePath => "createPath",
            Verb::GetStatus => "getStatus",
            Verb::DeletePath => "deletePath",
            Verb::RenamePath => "renamePath",
            Verb::ListChildren => "listChildren",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// Node metadata as the store reports it, keyed by wire path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub path: EncodedPath,
    pub kind: NodeKind,
    pub length: u64,
    /// Opaque token. Stores must keep it stable across rename so an
    /// ambiguous rename can be recognised at its destination.
    pub version: u64,
}

impl RemoteStatus {
    /// Whether two observations describe the same node state, ignoring
    /// where it lives.
    #[must_use]
    pub fn same_node(&self, other: &RemoteStatus) -> bool {
        self.kind == other.kind && self.length == other.length && self.version == other.version
    }
}

/// Decoded node metadata handed to filesystem callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub path: Path,
    pub kind: NodeKind,
    pub length: u64,
    pub version: u64,
}

impl NodeStatus {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.path.name()
    }
}

/// Failure of a single request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The request reached the service but no response came back.
    #[error("response lost")]
    ResponseLost,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn status<M: Into<String>>(code: u16, message: M) -> Self {
        StoreError::Status {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            StoreError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404)
    }

    /// 409 and 412: the request conflicts with current remote state.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self.code(), Some(409 | 412))
    }

    /// Failures worth another attempt: network trouble, 5xx, 408 and 429.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            StoreError::Timeout | StoreError::ConnectionReset(_) | StoreError::ResponseLost => true,
            StoreError::Malformed(_) => false,
        }
    }
}

/// A flat remote namespace addressed by encoded path strings.
///
/// Every method is one request/response exchange. Implementations own the
/// transport, authentication and connection pooling; callers own retries.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_path(&self, path: &EncodedPath, kind: NodeKind, overwrite: bool) -> StoreResult<()>;

    /// Missing paths answer 404.
    async fn get_status(&self, path: &EncodedPath) -> StoreResult<RemoteStatus>;

    async fn delete_path(&self, path: &EncodedPath, recursive: bool) -> StoreResult<()>;

    /// Moves `src` to `dst` in one step. With `overwrite` an existing file
    /// at `dst` is replaced; otherwise an occupied `dst` answers 409.
    async fn rename_path(&self, src: &EncodedPath, dst: &EncodedPath, overwrite: bool) -> StoreResult<()>;

    /// Immediate children of a directory, or the node itself for a file.
    async fn list_children(&self, path: &EncodedPath) -> StoreResult<Vec<RemoteStatus>>;
}
