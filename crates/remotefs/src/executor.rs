// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Remote call execution: retries, reconciliation and error mapping.
//!
//! Every store call is classified before it is sent. Idempotent calls are
//! simply retried on transient failure. State-dependent calls (rename,
//! exclusive create) treat every transient failure as "may have happened"
//! and query the store before deciding whether to send again.
//!
//! Cancellation is checked before a request goes out and while sleeping
//! between attempts, never between sending a state-dependent request and
//! settling its outcome.

use crate::codec::{EncodedPath, PathCodec};
use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::path::Path;
use crate::store::{NodeKind, RemoteStatus, RemoteStore, StoreError, StoreResult, Verb};
use backon::{BackoffBuilder, ConstantBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A path as the caller named it, together with its wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: Path,
    pub wire: EncodedPath,
}

impl Target {
    pub fn new(codec: &PathCodec, path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.clone(),
            wire: codec.encode(path)?,
        })
    }
}

/// Per-call execution settings, built on the caller's stack for one
/// logical filesystem operation.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub retry: &'a RetryPolicy,
    pub reconcile_attempts: usize,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Repeating the call converges on the same end state.
    Idempotent,
    /// The effect depends on state an earlier attempt may have changed.
    StateDependent,
}

/// Classifies a store call. `overwrite` only matters for creates.
#[must_use]
pub fn classify(verb: Verb, kind: NodeKind, overwrite: bool) -> Idempotency {
    match verb {
        Verb::RenamePath => Idempotency::StateDependent,
        Verb::CreatePath if kind == NodeKind::File && !overwrite => Idempotency::StateDependent,
        _ => Idempotency::Idempotent,
    }
}

/// Lifecycle of one mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Sent,
    Ambiguous,
    Reconciling,
    Done,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Sent => "sent",
            Phase::Ambiguous => "ambiguous",
            Phase::Reconciling => "reconciling",
            Phase::Done => "done",
        }
    }
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Removed,
    /// Nothing was there and no earlier attempt could have removed it.
    Absent,
}

// What the store says happened to an ambiguous rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenameState {
    Applied,
    NotApplied,
    Occupied,
    Undetermined,
}

// Per-call bookkeeping for a state-dependent mutation.
struct Mutation<'a> {
    verb: Verb,
    target: &'a Target,
    phase: Phase,
    attempts: usize,
    last_observed: String,
}

impl<'a> Mutation<'a> {
    fn new(verb: Verb, target: &'a Target) -> Self {
        Self {
            verb,
            target,
            phase: Phase::Pending,
            attempts: 0,
            last_observed: "nothing".to_string(),
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(self.phase != Phase::Done, "mutation re-entered after completion");
        if next == Phase::Sent {
            self.attempts += 1;
        }
        diagnostics::log_debug!(
            "{verb} {path}: {from} -> {to}",
            verb: self.verb.as_str(),
            path: self.target.wire.as_str(),
            from: self.phase.as_str(),
            to: next.as_str()
        );
        self.phase = next;
    }
}

// A settled idempotent call: the final non-transient answer and how many
// attempts it took.
struct Settled<T> {
    result: StoreResult<T>,
    attempts: usize,
}

/// Issues store calls on behalf of the filesystem facade.
#[derive(Clone)]
pub struct OperationExecutor {
    store: Arc<dyn RemoteStore>,
}

impl OperationExecutor {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Node status, `None` when the store answers 404.
    pub async fn status(&self, cx: &CallContext<'_>, target: &Target) -> Result<Option<RemoteStatus>> {
        self.status_inner(cx, target, true).await
    }

    pub async fn list(&self, cx: &CallContext<'_>, target: &Target) -> Result<Vec<RemoteStatus>> {
        let verb = Verb::ListChildren;
        let settled = self
            .retrying(cx, verb, target, true, || self.store.list_children(&target.wire))
            .await?;
        settled.result.map_err(|err| map_failure(verb, target, err))
    }

    /// Creates a file or directory.
    ///
    /// Directories are created if absent: an existing directory is success,
    /// an existing file is a conflict. An exclusive file create assumes the
    /// caller has just seen the path absent; a file found there after an
    /// ambiguous attempt is taken to be ours.
    pub async fn create(
        &self,
        cx: &CallContext<'_>,
        target: &Target,
        kind: NodeKind,
        overwrite: bool,
    ) -> Result<()> {
        match classify(Verb::CreatePath, kind, overwrite) {
            Idempotency::StateDependent => self.create_exclusive(cx, target).await,
            Idempotency::Idempotent => self.create_idempotent(cx, target, kind, overwrite).await,
        }
    }

    /// Deletes a node. A 404 after an ambiguous attempt counts as removed.
    pub async fn delete(&self, cx: &CallContext<'_>, target: &Target, recursive: bool) -> Result<Deletion> {
        let verb = Verb::DeletePath;
        let settled = self
            .retrying(cx, verb, target, true, || self.store.delete_path(&target.wire, recursive))
            .await?;
        match settled.result {
            Ok(()) => Ok(Deletion::Removed),
            Err(err) if err.is_not_found() && settled.attempts > 1 => {
                diagnostics::log_info!(
                    "Delete of {path} settled by an earlier attempt",
                    path: target.wire.as_str()
                );
                Ok(Deletion::Removed)
            }
            Err(err) if err.is_not_found() => Ok(Deletion::Absent),
            Err(err) if err.is_precondition() => Err(Error::conflict(&target.path, err.to_string())),
            Err(err) => Err(map_failure(verb, target, err)),
        }
    }

    /// Renames `src` to `dst`. `source` is the status of `src` observed
    /// before the call and identifies the node if it turns up at `dst`.
    pub async fn rename(
        &self,
        cx: &CallContext<'_>,
        src: &Target,
        dst: &Target,
        source: &RemoteStatus,
        overwrite: bool,
    ) -> Result<()> {
        let verb = Verb::RenamePath;
        let mut mutation = Mutation::new(verb, src);
        let mut delays = cx.retry.backoff().build();
        let mut ambiguous = false;

        loop {
            if cx.cancel.is_cancelled() {
                return Err(Error::cancelled(verb, &src.path));
            }
            mutation.advance(Phase::Sent);
            let err = match self
                .send(cx, self.store.rename_path(&src.wire, &dst.wire, overwrite))
                .await
            {
                Ok(()) => {
                    mutation.advance(Phase::Done);
                    return Ok(());
                }
                Err(err) => err,
            };

            // After an ambiguous attempt a 404 or 409 may just be our own
            // earlier rename showing through.
            let reconcile =
                err.is_transient() || (ambiguous && (err.is_not_found() || err.is_precondition()));
            if !reconcile {
                mutation.advance(Phase::Done);
                return Err(match err {
                    e if e.is_not_found() => Error::not_found(&src.path),
                    e if e.is_precondition() && !overwrite => Error::already_exists(&dst.path),
                    e if e.is_precondition() => Error::conflict(&dst.path, e.to_string()),
                    e => map_failure(verb, src, e),
                });
            }

            ambiguous = true;
            mutation.advance(Phase::Ambiguous);
            mutation.advance(Phase::Reconciling);
            match self
                .reconcile_rename(cx, src, dst, source, overwrite, &mut mutation)
                .await
            {
                RenameState::Applied => {
                    diagnostics::log_info!(
                        "Rename {src} -> {dst} reconciled as applied after {attempts} attempts",
                        src: src.wire.as_str(),
                        dst: dst.wire.as_str(),
                        attempts: mutation.attempts as u64
                    );
                    mutation.advance(Phase::Done);
                    return Ok(());
                }
                RenameState::Occupied => {
                    mutation.advance(Phase::Done);
                    return Err(Error::conflict(&dst.path, "destination occupied during rename"));
                }
                RenameState::NotApplied => {
                    let Some(delay) = delays.next() else {
                        mutation.advance(Phase::Done);
                        return Err(Error::transient(
                            verb,
                            &src.path,
                            format!(
                                "rename to {} not applied after {} attempts: {err}",
                                dst.path, mutation.attempts
                            ),
                        ));
                    };
                    diagnostics::log_warn!(
                        "Rename {src} -> {dst} not applied ({error}), retrying in {delay_ms}ms",
                        src: src.wire.as_str(),
                        dst: dst.wire.as_str(),
                        error: err.to_string(),
                        delay_ms: delay.as_millis() as u64
                    );
                    mutation.advance(Phase::Pending);
                    self.pause(cx, delay, verb, &src.path).await?;
                }
                RenameState::Undetermined => {
                    diagnostics::log_error!(
                        "Rename {src} -> {dst} outcome undetermined after {attempts} attempts, last observed {observed}",
                        src: src.wire.as_str(),
                        dst: dst.wire.as_str(),
                        attempts: mutation.attempts as u64,
                        observed: mutation.last_observed.as_str()
                    );
                    mutation.advance(Phase::Done);
                    return Err(Error::fatal(
                        verb,
                        &src.path,
                        format!(
                            "outcome of rename to {} could not be determined; last observed {}",
                            dst.path, mutation.last_observed
                        ),
                    ));
                }
            }
        }
    }

    async fn status_inner(
        &self,
        cx: &CallContext<'_>,
        target: &Target,
        cancellable: bool,
    ) -> Result<Option<RemoteStatus>> {
        let verb = Verb::GetStatus;
        let settled = self
            .retrying(cx, verb, target, cancellable, || self.store.get_status(&target.wire))
            .await?;
        match settled.result {
            Ok(status) => Ok(Some(status)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(map_failure(verb, target, err)),
        }
    }

    async fn create_idempotent(
        &self,
        cx: &CallContext<'_>,
        target: &Target,
        kind: NodeKind,
        overwrite: bool,
    ) -> Result<()> {
        let verb = Verb::CreatePath;
        let settled = self
            .retrying(cx, verb, target, true, || {
                self.store.create_path(&target.wire, kind, overwrite)
            })
            .await?;
        match settled.result {
            Ok(()) => Ok(()),
            Err(err) if err.is_precondition() && kind == NodeKind::Directory => {
                match self.status_inner(cx, target, false).await? {
                    Some(existing) if existing.kind == NodeKind::Directory => Ok(()),
                    Some(_) => Err(Error::conflict(&target.path, "a file exists at this path")),
                    None => Err(Error::conflict(&target.path, err.to_string())),
                }
            }
            Err(err) if err.is_precondition() => Err(Error::conflict(&target.path, err.to_string())),
            Err(err) => Err(map_failure(verb, target, err)),
        }
    }

    async fn create_exclusive(&self, cx: &CallContext<'_>, target: &Target) -> Result<()> {
        let verb = Verb::CreatePath;
        let mut mutation = Mutation::new(verb, target);
        let mut delays = cx.retry.backoff().build();
        let mut ambiguous = false;

        loop {
            if cx.cancel.is_cancelled() {
                return Err(Error::cancelled(verb, &target.path));
            }
            mutation.advance(Phase::Sent);
            let err = match self
                .send(cx, self.store.create_path(&target.wire, NodeKind::File, false))
                .await
            {
                Ok(()) => {
                    mutation.advance(Phase::Done);
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_transient() && !(ambiguous && err.is_precondition()) {
                mutation.advance(Phase::Done);
                if !err.is_precondition() {
                    return Err(map_failure(verb, target, err));
                }
                // 409 means either the entry exists or its parent is a file.
                return match self.status_inner(cx, target, false).await? {
                    Some(_) => Err(Error::already_exists(&target.path)),
                    None => Err(Error::conflict(&target.path, err.to_string())),
                };
            }

            ambiguous = true;
            mutation.advance(Phase::Ambiguous);
            mutation.advance(Phase::Reconciling);
            let observed = self.status_inner(cx, target, false).await?;
            mutation.last_observed = describe(observed.as_ref());
            match observed {
                Some(status) if status.kind == NodeKind::File => {
                    diagnostics::log_info!(
                        "Create of {path} reconciled as applied",
                        path: target.wire.as_str()
                    );
                    mutation.advance(Phase::Done);
                    return Ok(());
                }
                Some(_) => {
                    mutation.advance(Phase::Done);
                    return Err(Error::conflict(&target.path, "a directory exists at this path"));
                }
                None if err.is_precondition() => {
                    mutation.advance(Phase::Done);
                    return Err(Error::conflict(&target.path, err.to_string()));
                }
                None => {
                    let Some(delay) = delays.next() else {
                        mutation.advance(Phase::Done);
                        return Err(Error::transient(
                            verb,
                            &target.path,
                            format!("create not applied after {} attempts: {err}", mutation.attempts),
                        ));
                    };
                    diagnostics::log_warn!(
                        "Create of {path} not applied ({error}), retrying in {delay_ms}ms",
                        path: target.wire.as_str(),
                        error: err.to_string(),
                        delay_ms: delay.as_millis() as u64
                    );
                    mutation.advance(Phase::Pending);
                    self.pause(cx, delay, verb, &target.path).await?;
                }
            }
        }
    }

    async fn reconcile_rename(
        &self,
        cx: &CallContext<'_>,
        src: &Target,
        dst: &Target,
        source: &RemoteStatus,
        overwrite: bool,
        mutation: &mut Mutation<'_>,
    ) -> RenameState {
        let mut probe_delays = ConstantBuilder::default()
            .with_delay(Duration::from_millis(cx.retry.min_delay_ms))
            .with_max_times(cx.reconcile_attempts.saturating_sub(1))
            .build();

        loop {
            let observed = match (
                self.status_inner(cx, src, false).await,
                self.status_inner(cx, dst, false).await,
            ) {
                (Ok(at_src), Ok(at_dst)) => {
                    mutation.last_observed = format!(
                        "source {}, destination {}",
                        describe(at_src.as_ref()),
                        describe(at_dst.as_ref())
                    );
                    match (at_src, at_dst) {
                        (None, Some(moved)) if moved.same_node(source) => Some(RenameState::Applied),
                        (Some(_), None) => Some(RenameState::NotApplied),
                        (Some(_), Some(_)) if overwrite => Some(RenameState::NotApplied),
                        (Some(_), Some(_)) => Some(RenameState::Occupied),
                        _ => None,
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    mutation.last_observed = format!("status unavailable: {e}");
                    None
                }
            };
            if let Some(state) = observed {
                return state;
            }
            match probe_delays.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return RenameState::Undetermined,
            }
        }
    }

    async fn retrying<T, F, Fut>(
        &self,
        cx: &CallContext<'_>,
        verb: Verb,
        target: &Target,
        cancellable: bool,
        mut call: F,
    ) -> Result<Settled<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut delays = cx.retry.backoff().build();
        let mut attempts = 0;
        loop {
            if cancellable && cx.cancel.is_cancelled() {
                return Err(Error::cancelled(verb, &target.path));
            }
            attempts += 1;
            let result = self.send(cx, call()).await;
            match result {
                Err(err) if err.is_transient() => {
                    let Some(delay) = delays.next() else {
                        diagnostics::log_error!(
                            "{verb} {path} failed after {attempts} attempts: {error}",
                            verb: verb.as_str(),
                            path: target.wire.as_str(),
                            attempts: attempts as u64,
                            error: err.to_string()
                        );
                        return Err(Error::fatal(
                            verb,
                            &target.path,
                            format!("retry budget exhausted after {attempts} attempts: {err}"),
                        ));
                    };
                    diagnostics::log_warn!(
                        "{verb} {path} failed ({error}), retrying in {delay_ms}ms",
                        verb: verb.as_str(),
                        path: target.wire.as_str(),
                        error: err.to_string(),
                        delay_ms: delay.as_millis() as u64
                    );
                    if cancellable {
                        self.pause(cx, delay, verb, &target.path).await?;
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                }
                result => return Ok(Settled { result, attempts }),
            }
        }
    }

    async fn send<T, Fut>(&self, cx: &CallContext<'_>, request: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(cx.retry.attempt_timeout(), request).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn pause(&self, cx: &CallContext<'_>, delay: Duration, verb: Verb, path: &Path) -> Result<()> {
        tokio::select! {
            () = cx.cancel.cancelled() => Err(Error::cancelled(verb, path)),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn map_failure(verb: Verb, target: &Target, err: StoreError) -> Error {
    match err {
        e if e.is_not_found() => Error::not_found(&target.path),
        e if e.is_precondition() => Error::conflict(&target.path, e.to_string()),
        e => Error::fatal(verb, &target.path, e.to_string()),
    }
}

fn describe(status: Option<&RemoteStatus>) -> String {
    match status {
        None => "absent".to_string(),
        Some(s) => format!("{:?} v{} len {}", s.kind, s.version, s.length),
    }
}
