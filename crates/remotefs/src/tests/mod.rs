mod faults;

use crate::{ConsistencyPolicy, FsConfig, MemoryStore, NodeStatus, Path, RemoteFS, RetryPolicy};
use futures::TryStreamExt;
use std::sync::Arc;

// Millisecond delays keep retry and polling tests fast.
fn fast_config() -> FsConfig {
    FsConfig {
        retry: RetryPolicy {
            max_attempts: 4,
            min_delay_ms: 1,
            max_delay_ms: 4,
            factor: 2.0,
            jitter: false,
            attempt_timeout_ms: 500,
        },
        consistency: ConsistencyPolicy {
            verify_deletes: true,
            max_polls: 5,
            poll_delay_ms: 1,
        },
        ..FsConfig::default()
    }
}

fn new_fs() -> (RemoteFS, MemoryStore) {
    new_fs_with(MemoryStore::default(), fast_config())
}

fn new_fs_with(store: MemoryStore, config: FsConfig) -> (RemoteFS, MemoryStore) {
    diagnostics::init();
    (RemoteFS::new(Arc::new(store.clone()), config), store)
}

fn path(s: &str) -> Path {
    Path::parse(s).unwrap()
}

async fn list_all(fs: &RemoteFS, dir: &Path) -> Vec<NodeStatus> {
    fs.list(dir).try_collect().await.unwrap()
}

async fn list_paths(fs: &RemoteFS, dir: &Path) -> Vec<Path> {
    list_all(fs, dir).await.into_iter().map(|s| s.path).collect()
}
