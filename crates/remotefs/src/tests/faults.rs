use super::{fast_config, list_paths, new_fs, new_fs_with, path};
use crate::memory::Fault;
use crate::{
    DeleteMissing, EncodedPath, Error, ErrorKind, FsConfig, MemoryStore, RemoteFS, RetryPolicy,
    StoreError, Verb, Visibility,
};
use futures::TryStreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn unavailable() -> Fault {
    Fault::Reject(StoreError::status(503, "service unavailable"))
}

#[tokio::test]
async fn test_mkdir_survives_transient_failures() {
    let (fs, store) = new_fs();
    store.inject(Verb::CreatePath, unavailable()).await;
    store.inject(Verb::CreatePath, Fault::Reject(StoreError::ConnectionReset("eof".into()))).await;

    assert!(fs.mkdir(&path("/d"), false).await.unwrap().is_confirmed());
    assert_eq!(store.request_count(Verb::CreatePath).await, 3);
}

#[tokio::test]
async fn test_exhausted_retries_are_fatal() {
    let (fs, store) = new_fs();
    for _ in 0..4 {
        store.inject(Verb::ListChildren, unavailable()).await;
    }
    let err = list_err(&fs, "/").await;
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(store.request_count(Verb::ListChildren).await, 4);
}

async fn list_err(fs: &RemoteFS, dir: &str) -> Error {
    fs.list(&path(dir)).try_collect::<Vec<_>>().await.unwrap_err()
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (fs, store) = new_fs();
    store.inject(Verb::CreatePath, Fault::Reject(StoreError::status(403, "forbidden"))).await;

    let err = fs.mkdir(&path("/d"), false).await.unwrap_err();
    assert_eq!(err, Error::fatal(Verb::CreatePath, &path("/d"), "HTTP 403: forbidden"));
    assert_eq!(store.request_count(Verb::CreatePath).await, 1);
}

#[tokio::test]
async fn test_stalled_attempt_times_out_and_retries() {
    let config = FsConfig {
        retry: RetryPolicy {
            attempt_timeout_ms: 30,
            ..fast_config().retry
        },
        ..fast_config()
    };
    let (fs, store) = new_fs_with(MemoryStore::default(), config);
    store.inject(Verb::GetStatus, Fault::Stall(Duration::from_secs(5))).await;

    assert!(fs.exists(&path("/")).await.unwrap());
    assert_eq!(store.request_count(Verb::GetStatus).await, 2);
}

#[tokio::test]
async fn test_lost_rename_response_is_applied_once() {
    let (fs, store) = new_fs();
    fs.create(&path("/a"), false).await.unwrap();
    let before = fs.status(&path("/a")).await.unwrap();
    store.inject(Verb::RenamePath, Fault::LoseResponse).await;

    assert!(fs.rename(&path("/a"), &path("/b")).await.unwrap().is_confirmed());

    assert_eq!(store.request_count(Verb::RenamePath).await, 1);
    assert!(!store.contains(&EncodedPath::from_wire("/a")).await);
    assert_eq!(fs.status(&path("/b")).await.unwrap().version, before.version);
}

#[tokio::test]
async fn test_rejected_rename_is_resent() {
    let (fs, store) = new_fs();
    fs.create(&path("/a"), false).await.unwrap();
    store.inject(Verb::RenamePath, Fault::Reject(StoreError::Timeout)).await;

    fs.rename(&path("/a"), &path("/b")).await.unwrap();

    assert_eq!(store.request_count(Verb::RenamePath).await, 2);
    assert!(store.contains(&EncodedPath::from_wire("/b")).await);
    assert!(!store.contains(&EncodedPath::from_wire("/a")).await);
}

#[tokio::test]
async fn test_rename_never_applied_is_transient() {
    let (fs, store) = new_fs();
    fs.create(&path("/a"), false).await.unwrap();
    for _ in 0..4 {
        store.inject(Verb::RenamePath, Fault::Reject(StoreError::status(502, "bad gateway"))).await;
    }

    let err = fs.rename(&path("/a"), &path("/b")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientFailure);
    assert!(store.contains(&EncodedPath::from_wire("/a")).await);
    assert!(!store.contains(&EncodedPath::from_wire("/b")).await);
}

#[tokio::test]
async fn test_undeterminable_rename_is_fatal() {
    let (fs, store) = new_fs();
    fs.create(&path("/a"), false).await.unwrap();
    store.clear_requests().await;
    // The two pre-rename reads pass; every reconciliation probe is refused.
    store.inject(Verb::GetStatus, Fault::Stall(Duration::ZERO)).await;
    store.inject(Verb::GetStatus, Fault::Stall(Duration::ZERO)).await;
    for _ in 0..(2 * fast_config().reconcile_attempts) {
        store.inject(Verb::GetStatus, Fault::Reject(StoreError::status(403, "forbidden"))).await;
    }
    store.inject(Verb::RenamePath, Fault::LoseResponse).await;

    let err = fs.rename(&path("/a"), &path("/b")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(err.to_string().contains("could not be determined"), "{err}");
    assert_eq!(store.request_count(Verb::RenamePath).await, 1);
}

#[tokio::test]
async fn test_lost_create_response_is_success() {
    let (fs, store) = new_fs();
    store.inject(Verb::CreatePath, Fault::LoseResponse).await;

    assert!(fs.create(&path("/new"), false).await.unwrap().is_confirmed());
    assert_eq!(store.request_count(Verb::CreatePath).await, 1);
}

#[tokio::test]
async fn test_lost_delete_response_is_success() {
    let strict = FsConfig {
        delete_missing: DeleteMissing::NotFound,
        ..fast_config()
    };
    let (fs, store) = new_fs_with(MemoryStore::default(), strict);
    fs.create(&path("/f"), false).await.unwrap();
    store.inject(Verb::DeletePath, Fault::LoseResponse).await;

    assert!(fs.delete(&path("/f"), false).await.unwrap().is_confirmed());
    assert_eq!(store.request_count(Verb::DeletePath).await, 2);
}

#[tokio::test]
async fn test_strict_delete_of_missing_path_survives_retries() {
    let strict = FsConfig {
        delete_missing: DeleteMissing::NotFound,
        ..fast_config()
    };
    let (fs, store) = new_fs_with(MemoryStore::default(), strict);
    store.inject(Verb::DeletePath, unavailable()).await;

    assert_eq!(
        fs.delete(&path("/never-existed"), false).await.unwrap_err(),
        Error::not_found(&path("/never-existed"))
    );
    assert_eq!(store.request_count(Verb::DeletePath).await, 0);

    fs.create(&path("/f"), false).await.unwrap();
    assert!(fs.delete(&path("/f"), false).await.unwrap().is_confirmed());
    assert_eq!(store.request_count(Verb::DeletePath).await, 2);
    assert!(!fs.exists(&path("/f")).await.unwrap());
}

#[tokio::test]
async fn test_delete_converges_on_lagging_store() {
    let (fs, _store) = new_fs_with(MemoryStore::with_delete_lag(2), fast_config());
    fs.create(&path("/dir/f"), false).await.unwrap();

    assert_eq!(
        fs.delete(&path("/dir/f"), false).await.unwrap(),
        Visibility::Confirmed { polls: 3 }
    );
    assert!(!fs.exists(&path("/dir/f")).await.unwrap());
    assert!(list_paths(&fs, &path("/dir")).await.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_send() {
    let (fs, store) = new_fs();
    let token = CancellationToken::new();
    token.cancel();

    let err = fs.cancellable(token).mkdir(&path("/d"), false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(store.requests().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_during_backoff() {
    let slow = FsConfig {
        retry: RetryPolicy {
            min_delay_ms: 5_000,
            max_delay_ms: 5_000,
            ..fast_config().retry
        },
        ..fast_config()
    };
    let (fs, store) = new_fs_with(MemoryStore::default(), slow);
    store.inject(Verb::GetStatus, unavailable()).await;
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        fs.cancellable(token).status(&path("/")),
    )
    .await
    .unwrap();
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(store.request_count(Verb::GetStatus).await, 1);
}

#[tokio::test]
async fn test_cancel_after_send_still_completes_rename() {
    let (fs, store) = new_fs();
    fs.create(&path("/a"), false).await.unwrap();
    store.inject(Verb::RenamePath, Fault::Stall(Duration::from_millis(150))).await;
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let seen = fs
        .cancellable(token)
        .rename(&path("/a"), &path("/b"))
        .await
        .unwrap();
    assert_eq!(seen, Visibility::Unconfirmed { polls: 0 });
    assert!(store.contains(&EncodedPath::from_wire("/b")).await);
    assert!(!store.contains(&EncodedPath::from_wire("/a")).await);
}

#[tokio::test]
async fn test_concurrent_creates_share_parents() {
    let (fs, _store) = new_fs();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let fs = fs.clone();
        tasks.push(tokio::spawn(async move {
            fs.create(&path(&format!("/shared/deep/file-{i}")), false).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(list_paths(&fs, &path("/shared/deep")).await.len(), 8);
}
