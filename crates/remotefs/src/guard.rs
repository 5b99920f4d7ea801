// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded waits for a completed mutation to become observable.

use crate::config::ConsistencyPolicy;
use crate::error::{Error, ErrorKind, Result};
use crate::executor::{CallContext, OperationExecutor, Target};
use crate::store::NodeKind;
use backon::BackoffBuilder;
use std::future::Future;

/// How a successful mutation was observed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The post-condition was seen after `polls` status reads.
    Confirmed { polls: usize },
    /// The store accepted the mutation but the post-condition was not seen
    /// within the window, or the wait was cancelled.
    Unconfirmed { polls: usize },
}

impl Visibility {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Visibility::Confirmed { .. })
    }

    #[must_use]
    pub fn polls(&self) -> usize {
        match self {
            Visibility::Confirmed { polls } | Visibility::Unconfirmed { polls } => *polls,
        }
    }
}

/// Polls the store after a mutation. Never repeats the mutation itself.
#[derive(Clone)]
pub struct ConsistencyGuard {
    executor: OperationExecutor,
    policy: ConsistencyPolicy,
}

impl ConsistencyGuard {
    pub fn new(executor: OperationExecutor, policy: ConsistencyPolicy) -> Self {
        Self { executor, policy }
    }

    /// After delete: waits until the path reads as absent. Skipped when
    /// `verify_deletes` is off.
    pub async fn await_absent(&self, cx: &CallContext<'_>, target: &Target) -> Visibility {
        if !self.policy.verify_deletes {
            return Visibility::Unconfirmed { polls: 0 };
        }
        let executor = &self.executor;
        self.watch(cx, "absent", target, move || async move {
            Ok::<_, Error>(executor.status(cx, target).await?.is_none())
        })
        .await
    }

    /// After mkdir or create: waits until a node of `kind` is present.
    pub async fn await_present(&self, cx: &CallContext<'_>, target: &Target, kind: NodeKind) -> Visibility {
        let executor = &self.executor;
        self.watch(cx, "present", target, move || async move {
            Ok::<_, Error>(executor
                .status(cx, target)
                .await?
                .is_some_and(|status| status.kind == kind))
        })
        .await
    }

    /// After rename: waits until `dst` is present and `src` absent.
    pub async fn confirm_rename(&self, cx: &CallContext<'_>, src: &Target, dst: &Target) -> Visibility {
        let executor = &self.executor;
        self.watch(cx, "renamed", dst, move || async move {
            if executor.status(cx, dst).await?.is_none() {
                return Ok(false);
            }
            Ok::<_, Error>(executor.status(cx, src).await?.is_none())
        })
        .await
    }

    async fn watch<F, Fut>(&self, cx: &CallContext<'_>, condition: &str, target: &Target, mut check: F) -> Visibility
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut pauses = self.policy.polling().build();
        let mut polls = 0;
        loop {
            if cx.cancel.is_cancelled() {
                return Visibility::Unconfirmed { polls };
            }
            polls += 1;
            match check().await {
                Ok(true) => return Visibility::Confirmed { polls },
                Ok(false) => {}
                Err(err) if err.kind() == ErrorKind::Cancelled => return Visibility::Unconfirmed { polls },
                Err(err) => {
                    diagnostics::log_warn!(
                        "Could not verify {path} is {condition}: {error}",
                        path: target.wire.as_str(),
                        condition: condition,
                        error: err.to_string()
                    );
                    return Visibility::Unconfirmed { polls };
                }
            }
            let Some(delay) = pauses.next() else {
                diagnostics::log_warn!(
                    "{path} not observed {condition} after {polls} polls",
                    path: target.wire.as_str(),
                    condition: condition,
                    polls: polls as u64
                );
                return Visibility::Unconfirmed { polls };
            };
            tokio::select! {
                () = cx.cancel.cancelled() => return Visibility::Unconfirmed { polls },
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncodedPath, PathCodec};
    use crate::config::RetryPolicy;
    use crate::memory::MemoryStore;
    use crate::path::Path;
    use crate::store::{RemoteStore, Verb};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            min_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    fn consistency(max_polls: usize) -> ConsistencyPolicy {
        ConsistencyPolicy {
            verify_deletes: true,
            max_polls,
            poll_delay_ms: 1,
        }
    }

    fn target(s: &str) -> Target {
        Target::new(&PathCodec, &Path::parse(s).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_await_absent_outlasts_delete_lag() {
        let store = MemoryStore::with_delete_lag(2);
        store.insert_file(&EncodedPath::from_wire("/gone"), 3).await.unwrap();
        store.delete_path(&EncodedPath::from_wire("/gone"), false).await.unwrap();
        let guard = ConsistencyGuard::new(OperationExecutor::new(Arc::new(store.clone())), consistency(5));
        let retry = retry();
        let cancel = CancellationToken::new();
        let cx = CallContext { retry: &retry, reconcile_attempts: 1, cancel: &cancel };

        let seen = guard.await_absent(&cx, &target("/gone")).await;
        assert_eq!(seen, Visibility::Confirmed { polls: 3 });
    }

    #[tokio::test]
    async fn test_window_exhausted_is_unconfirmed() {
        let store = MemoryStore::with_delete_lag(10);
        store.insert_file(&EncodedPath::from_wire("/slow"), 0).await.unwrap();
        store.delete_path(&EncodedPath::from_wire("/slow"), false).await.unwrap();
        let guard = ConsistencyGuard::new(OperationExecutor::new(Arc::new(store.clone())), consistency(3));
        let retry = retry();
        let cancel = CancellationToken::new();
        let cx = CallContext { retry: &retry, reconcile_attempts: 1, cancel: &cancel };

        let seen = guard.await_absent(&cx, &target("/slow")).await;
        assert_eq!(seen, Visibility::Unconfirmed { polls: 3 });
        assert_eq!(store.request_count(Verb::GetStatus).await, 3);
    }

    #[tokio::test]
    async fn test_disabled_delete_verification() {
        let store = MemoryStore::default();
        let policy = ConsistencyPolicy {
            verify_deletes: false,
            ..consistency(3)
        };
        let guard = ConsistencyGuard::new(OperationExecutor::new(Arc::new(store.clone())), policy);
        let retry = retry();
        let cancel = CancellationToken::new();
        let cx = CallContext { retry: &retry, reconcile_attempts: 1, cancel: &cancel };

        assert_eq!(guard.await_absent(&cx, &target("/x")).await, Visibility::Unconfirmed { polls: 0 });
        assert_eq!(store.request_count(Verb::GetStatus).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_is_unconfirmed() {
        let store = MemoryStore::default();
        let guard = ConsistencyGuard::new(OperationExecutor::new(Arc::new(store.clone())), consistency(3));
        let retry = retry();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let cx = CallContext { retry: &retry, reconcile_attempts: 1, cancel: &cancel };

        let seen = guard.await_present(&cx, &target("/"), NodeKind::Directory).await;
        assert_eq!(seen, Visibility::Unconfirmed { polls: 0 });
    }

    #[tokio::test]
    async fn test_confirm_rename_and_present() {
        let store = MemoryStore::default();
        store.insert_file(&EncodedPath::from_wire("/a"), 1).await.unwrap();
        store
            .rename_path(&EncodedPath::from_wire("/a"), &EncodedPath::from_wire("/b"), false)
            .await
            .unwrap();
        let guard = ConsistencyGuard::new(OperationExecutor::new(Arc::new(store.clone())), consistency(3));
        let retry = retry();
        let cancel = CancellationToken::new();
        let cx = CallContext { retry: &retry, reconcile_attempts: 1, cancel: &cancel };

        assert!(guard.confirm_rename(&cx, &target("/a"), &target("/b")).await.is_confirmed());
        assert!(guard.await_present(&cx, &target("/b"), NodeKind::File).await.is_confirmed());
        let wrong_kind = guard.await_present(&cx, &target("/b"), NodeKind::Directory).await;
        assert_eq!(wrong_kind, Visibility::Unconfirmed { polls: 3 });
    }
}
