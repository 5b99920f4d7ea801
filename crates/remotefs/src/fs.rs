// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical filesystem operations over a [`RemoteStore`].

use crate::codec::PathCodec;
use crate::config::{DeleteMissing, FsConfig, RenameOverwrite};
use crate::error::{Error, Result};
use crate::executor::{CallContext, Deletion, OperationExecutor, Target};
use crate::guard::{ConsistencyGuard, Visibility};
use crate::path::Path;
use crate::store::{NodeKind, NodeStatus, RemoteStatus, RemoteStore};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A filesystem handle. Cheap to clone; clones share the store and config.
#[derive(Clone)]
pub struct RemoteFS {
    executor: OperationExecutor,
    guard: ConsistencyGuard,
    codec: PathCodec,
    config: Arc<FsConfig>,
    cancel: CancellationToken,
}

impl RemoteFS {
    pub fn new(store: Arc<dyn RemoteStore>, config: FsConfig) -> Self {
        let executor = OperationExecutor::new(store);
        let guard = ConsistencyGuard::new(executor.clone(), config.consistency.clone());
        Self {
            executor,
            guard,
            codec: PathCodec,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    /// A handle whose operations observe `token`.
    #[must_use]
    pub fn cancellable(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub async fn status(&self, path: &Path) -> Result<NodeStatus> {
        let target = self.target(path)?;
        match self.executor.status(&self.cx(), &target).await? {
            Some(remote) => self.decode(remote),
            None => Err(Error::not_found(path)),
        }
    }

    pub async fn exists(&self, path: &Path) -> Result<bool> {
        let target = self.target(path)?;
        Ok(self.executor.status(&self.cx(), &target).await?.is_some())
    }

    /// Creates a directory. An existing directory is success.
    pub async fn mkdir(&self, path: &Path, create_parents: bool) -> Result<Visibility> {
        let target = self.target(path)?;
        if path.is_root() {
            return Ok(Visibility::Confirmed { polls: 0 });
        }
        let cx = self.cx();
        if create_parents {
            self.create_with_parents(&cx, &target, NodeKind::Directory, false)
                .await?;
        } else {
            self.executor
                .create(&cx, &target, NodeKind::Directory, false)
                .await
                .map_err(|err| match (err, path.parent()) {
                    (Error::NotFound(_), Some(parent)) => Error::not_found(&parent),
                    (err, _) => err,
                })?;
        }
        diagnostics::log_debug!("Created directory {path}", path: target.wire.as_str());
        Ok(self.guard.await_present(&cx, &target, NodeKind::Directory).await)
    }

    /// Creates an empty file, creating missing ancestors.
    ///
    /// Without `overwrite` the path is read first and an existing node is
    /// refused. If an attempt is then ambiguous, a file found at the path
    /// counts as created by this call, even if a concurrent writer put it
    /// there.
    pub async fn create(&self, path: &Path, overwrite: bool) -> Result<Visibility> {
        let target = self.target(path)?;
        if path.is_root() {
            return Err(existing_directory(path, overwrite));
        }
        let cx = self.cx();
        // Exclusive creates rely on this read: a file found after an
        // ambiguous attempt is then ours.
        match self.executor.status(&cx, &target).await? {
            Some(existing) if existing.kind == NodeKind::Directory => {
                return Err(existing_directory(path, overwrite));
            }
            Some(_) if !overwrite => return Err(Error::already_exists(path)),
            _ => {}
        }
        self.create_with_parents(&cx, &target, NodeKind::File, overwrite)
            .await?;
        diagnostics::log_debug!("Created file {path}", path: target.wire.as_str());
        Ok(self.guard.await_present(&cx, &target, NodeKind::File).await)
    }

    /// Deletes a file or, with `recursive`, a directory tree.
    pub async fn delete(&self, path: &Path, recursive: bool) -> Result<Visibility> {
        let target = self.target(path)?;
        if path.is_root() {
            return Err(Error::conflict(path, "cannot delete the root directory"));
        }
        let cx = self.cx();
        // A 404 after retries cannot tell a never-existing path from our own
        // lost delete, so the strict policy reads first.
        if self.config.delete_missing == DeleteMissing::NotFound
            && self.executor.status(&cx, &target).await?.is_none()
        {
            return Err(Error::not_found(path));
        }
        match self.executor.delete(&cx, &target, recursive).await? {
            Deletion::Removed => {
                diagnostics::log_debug!("Deleted {path}", path: target.wire.as_str());
                Ok(self.guard.await_absent(&cx, &target).await)
            }
            Deletion::Absent => match self.config.delete_missing {
                DeleteMissing::Succeed => Ok(Visibility::Confirmed { polls: 0 }),
                DeleteMissing::NotFound => Err(Error::not_found(path)),
            },
        }
    }

    /// Moves `src` to `dst`. The node is never visible at both paths or at
    /// neither once this returns.
    pub async fn rename(&self, src: &Path, dst: &Path) -> Result<Visibility> {
        let src_target = self.target(src)?;
        let dst_target = self.target(dst)?;
        if src.is_root() || dst.is_root() {
            return Err(Error::conflict(src, "cannot rename the root directory"));
        }
        if dst != src && dst.starts_with(src) {
            return Err(Error::conflict(dst, format!("destination is inside {src}")));
        }

        let cx = self.cx();
        let Some(source) = self.executor.status(&cx, &src_target).await? else {
            return Err(Error::not_found(src));
        };
        if src == dst {
            return Ok(Visibility::Confirmed { polls: 0 });
        }
        self.require_directory(&cx, dst.parent().as_ref()).await?;

        let overwrite = match self.executor.status(&cx, &dst_target).await? {
            None => false,
            Some(existing) => match self.config.rename_overwrite {
                RenameOverwrite::Fail => return Err(Error::already_exists(dst)),
                RenameOverwrite::Replace
                    if existing.kind == NodeKind::File && source.kind == NodeKind::File =>
                {
                    true
                }
                RenameOverwrite::Replace => {
                    return Err(Error::conflict(dst, "only a file can replace a file"));
                }
            },
        };

        self.executor
            .rename(&cx, &src_target, &dst_target, &source, overwrite)
            .await?;
        diagnostics::log_debug!(
            "Renamed {src} to {dst}",
            src: src_target.wire.as_str(),
            dst: dst_target.wire.as_str()
        );
        Ok(self.guard.confirm_rename(&cx, &src_target, &dst_target).await)
    }

    /// Lists the immediate children of a directory, or the file itself.
    ///
    /// The stream issues the remote call when first polled; a missing path
    /// surfaces as its first item.
    pub fn list(&self, path: &Path) -> BoxStream<'static, Result<NodeStatus>> {
        let fs = self.clone();
        let path = path.clone();
        let codec = self.codec;
        stream::once(async move {
            let target = fs.target(&path)?;
            fs.executor.list(&fs.cx(), &target).await
        })
        .map_ok(move |entries| stream::iter(entries.into_iter().map(move |remote| decode(codec, remote))))
        .try_flatten()
        .boxed()
    }

    fn cx(&self) -> CallContext<'_> {
        CallContext {
            retry: &self.config.retry,
            reconcile_attempts: self.config.reconcile_attempts,
            cancel: &self.cancel,
        }
    }

    fn target(&self, path: &Path) -> Result<Target> {
        Target::new(&self.codec, path)
    }

    fn decode(&self, remote: RemoteStatus) -> Result<NodeStatus> {
        decode(self.codec, remote)
    }

    async fn require_directory(&self, cx: &CallContext<'_>, path: Option<&Path>) -> Result<()> {
        let Some(path) = path.filter(|p| !p.is_root()) else {
            return Ok(());
        };
        match self.executor.status(cx, &self.target(path)?).await? {
            None => Err(Error::not_found(path)),
            Some(status) if status.kind == NodeKind::File => {
                Err(Error::conflict(path, "not a directory"))
            }
            Some(_) => Ok(()),
        }
    }

    // One attempt first; ancestors are only created when the store says the
    // parent is missing.
    async fn create_with_parents(
        &self,
        cx: &CallContext<'_>,
        target: &Target,
        kind: NodeKind,
        overwrite: bool,
    ) -> Result<()> {
        match self.executor.create(cx, target, kind, overwrite).await {
            Err(Error::NotFound(_)) => {
                for ancestor in target.path.ancestors() {
                    let dir = self.target(&ancestor)?;
                    self.executor
                        .create(cx, &dir, NodeKind::Directory, false)
                        .await?;
                }
                self.executor.create(cx, target, kind, overwrite).await
            }
            other => other,
        }
    }
}

fn decode(codec: PathCodec, remote: RemoteStatus) -> Result<NodeStatus> {
    Ok(NodeStatus {
        path: codec.decode(&remote.path)?,
        kind: remote.kind,
        length: remote.length,
        version: remote.version,
    })
}

fn existing_directory(path: &Path, overwrite: bool) -> Error {
    if overwrite {
        Error::conflict(path, "a directory exists at this path")
    } else {
        Error::already_exists(path)
    }
}
