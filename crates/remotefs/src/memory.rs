// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory [`RemoteStore`] for tests and local development.
//!
//! Answers with the status codes a REST path service would use, keeps the
//! version token stable across rename, records every request, and can be
//! told to misbehave:
//! - one-shot faults per verb ([`Fault`]), consumed in FIFO order
//! - a delete lag, leaving deleted nodes visible for a number of reads

use crate::codec::EncodedPath;
use crate::store::{NodeKind, RemoteStatus, RemoteStore, StoreError, StoreResult, Verb};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Misbehaviour injected into the next request for a verb.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail without touching state.
    Reject(StoreError),
    /// Apply the request, then drop the response.
    LoseResponse,
    /// Sleep before applying, e.g. past the caller's attempt timeout.
    Stall(Duration),
}

/// One request as the store saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub verb: Verb,
    pub path: EncodedPath,
    pub target: Option<EncodedPath>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    kind: NodeKind,
    length: u64,
    version: u64,
}

impl Node {
    fn status(&self, path: &EncodedPath) -> RemoteStatus {
        RemoteStatus {
            path: path.clone(),
            kind: self.kind,
            length: self.length,
            version: self.version,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore(Arc<Mutex<State>>);

struct State {
    nodes: BTreeMap<EncodedPath, Node>,
    // Deleted nodes still visible to readers: path -> (node, reads left)
    ghosts: HashMap<EncodedPath, (Node, usize)>,
    delete_lag: usize,
    next_version: u64,
    faults: HashMap<Verb, VecDeque<Fault>>,
    requests: Vec<Request>,
}

impl Default for State {
    fn default() -> Self {
        let root = Node {
            kind: NodeKind::Directory,
            length: 0,
            version: 1,
        };
        Self {
            nodes: BTreeMap::from([(EncodedPath::root(), root)]),
            ghosts: HashMap::new(),
            delete_lag: 0,
            next_version: 2,
            faults: HashMap::new(),
            requests: Vec::new(),
        }
    }
}

impl MemoryStore {
    /// A store whose deletes stay visible for `reads` observations.
    #[must_use]
    pub fn with_delete_lag(reads: usize) -> Self {
        let state = State {
            delete_lag: reads,
            ..State::default()
        };
        Self(Arc::new(Mutex::new(state)))
    }

    pub async fn inject(&self, verb: Verb, fault: Fault) {
        self.0.lock().await.faults.entry(verb).or_default().push_back(fault);
    }

    pub async fn requests(&self) -> Vec<Request> {
        self.0.lock().await.requests.clone()
    }

    pub async fn request_count(&self, verb: Verb) -> usize {
        self.0.lock().await.requests.iter().filter(|r| r.verb == verb).count()
    }

    pub async fn clear_requests(&self) {
        self.0.lock().await.requests.clear();
    }

    /// Seeds a file directly, bypassing faults and the request log.
    pub async fn insert_file(&self, path: &EncodedPath, length: u64) -> StoreResult<RemoteStatus> {
        let mut state = self.0.lock().await;
        state.create(path, NodeKind::File, false)?;
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::Malformed(format!("{path} vanished")))?;
        node.length = length;
        Ok(node.status(path))
    }

    /// Ground truth, ignoring lagging readers.
    pub async fn contains(&self, path: &EncodedPath) -> bool {
        self.0.lock().await.nodes.contains_key(path)
    }

    async fn call<T, F>(&self, request: Request, apply: F) -> StoreResult<T>
    where
        T: Send,
        F: FnOnce(&mut State) -> StoreResult<T> + Send,
    {
        let fault = {
            let mut state = self.0.lock().await;
            let verb = request.verb;
            state.requests.push(request);
            state.faults.get_mut(&verb).and_then(VecDeque::pop_front)
        };
        match fault {
            None => apply(&mut *self.0.lock().await),
            Some(Fault::Reject(err)) => Err(err),
            Some(Fault::LoseResponse) => {
                _ = apply(&mut *self.0.lock().await);
                Err(StoreError::ResponseLost)
            }
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                apply(&mut *self.0.lock().await)
            }
        }
    }
}

impl State {
    fn bump(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn observe(&mut self, path: &EncodedPath) -> Option<Node> {
        if let Some(node) = self.nodes.get(path) {
            return Some(*node);
        }
        let (node, left) = self.ghosts.get_mut(path)?;
        let node = *node;
        *left -= 1;
        if *left == 0 {
            _ = self.ghosts.remove(path);
        }
        Some(node)
    }

    fn require_parent_dir(&self, path: &EncodedPath) -> StoreResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::status(400, "root has no parent"))?;
        match self.nodes.get(&parent) {
            None => Err(StoreError::status(404, format!("parent {parent} not found"))),
            Some(node) if node.kind == NodeKind::File => {
                Err(StoreError::status(409, format!("parent {parent} is a file")))
            }
            Some(_) => Ok(()),
        }
    }

    fn has_children(&self, path: &EncodedPath) -> bool {
        self.nodes.keys().any(|p| p.is_within(path))
    }

    fn create(&mut self, path: &EncodedPath, kind: NodeKind, overwrite: bool) -> StoreResult<()> {
        if path.is_root() {
            return Err(StoreError::status(409, "root already exists"));
        }
        self.require_parent_dir(path)?;
        if let Some(existing) = self.nodes.get(path) {
            if !overwrite {
                return Err(StoreError::status(409, format!("{path} already exists")));
            }
            if existing.kind == NodeKind::Directory || kind == NodeKind::Directory {
                return Err(StoreError::status(409, format!("cannot overwrite {path}")));
            }
        }
        let version = self.bump();
        _ = self.ghosts.remove(path);
        _ = self.nodes.insert(
            path.clone(),
            Node {
                kind,
                length: 0,
                version,
            },
        );
        Ok(())
    }

    fn status(&mut self, path: &EncodedPath) -> StoreResult<RemoteStatus> {
        self.observe(path)
            .map(|node| node.status(path))
            .ok_or_else(|| StoreError::status(404, format!("{path} not found")))
    }

    fn delete(&mut self, path: &EncodedPath, recursive: bool) -> StoreResult<()> {
        if path.is_root() {
            return Err(StoreError::status(403, "cannot delete root"));
        }
        let Some(node) = self.nodes.get(path) else {
            return Err(StoreError::status(404, format!("{path} not found")));
        };
        if node.kind == NodeKind::Directory && !recursive && self.has_children(path) {
            return Err(StoreError::status(409, format!("{path} is not empty")));
        }
        let doomed: Vec<EncodedPath> = self
            .nodes
            .keys()
            .filter(|p| *p == path || p.is_within(path))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(node) = self.nodes.remove(&p) {
                if self.delete_lag > 0 {
                    _ = self.ghosts.insert(p, (node, self.delete_lag));
                }
            }
        }
        Ok(())
    }

    fn rename(&mut self, src: &EncodedPath, dst: &EncodedPath, overwrite: bool) -> StoreResult<()> {
        if src.is_root() || dst.is_root() {
            return Err(StoreError::status(400, "cannot rename root"));
        }
        let Some(source) = self.nodes.get(src).copied() else {
            return Err(StoreError::status(404, format!("{src} not found")));
        };
        if src == dst {
            return Ok(());
        }
        if dst.is_within(src) {
            return Err(StoreError::status(400, format!("{dst} is inside {src}")));
        }
        self.require_parent_dir(dst)?;
        if let Some(existing) = self.nodes.get(dst) {
            let replaceable =
                overwrite && existing.kind == NodeKind::File && source.kind == NodeKind::File;
            if !replaceable {
                return Err(StoreError::status(409, format!("{dst} already exists")));
            }
            _ = self.nodes.remove(dst);
        }
        let moving: Vec<EncodedPath> = self
            .nodes
            .keys()
            .filter(|p| *p == src || p.is_within(src))
            .cloned()
            .collect();
        for from in moving {
            if let (Some(node), Some(to)) = (self.nodes.remove(&from), from.rebase(src, dst)) {
                _ = self.ghosts.remove(&to);
                _ = self.nodes.insert(to, node);
            }
        }
        Ok(())
    }

    fn list(&mut self, path: &EncodedPath) -> StoreResult<Vec<RemoteStatus>> {
        let node = self
            .observe(path)
            .ok_or_else(|| StoreError::status(404, format!("{path} not found")))?;
        if node.kind == NodeKind::File {
            return Ok(vec![node.status(path)]);
        }
        let mut children: Vec<RemoteStatus> = self
            .nodes
            .iter()
            .filter(|(p, _)| p.parent().as_ref() == Some(path))
            .map(|(p, node)| node.status(p))
            .collect();
        let ghosts: Vec<EncodedPath> = self
            .ghosts
            .keys()
            .filter(|p| p.parent().as_ref() == Some(path))
            .cloned()
            .collect();
        for ghost in ghosts {
            if let Some(node) = self.observe(&ghost) {
                children.push(node.status(&ghost));
            }
        }
        Ok(children)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_path(&self, path: &EncodedPath, kind: NodeKind, overwrite: bool) -> StoreResult<()> {
        let request = Request {
            verb: Verb::CreatePath,
            path: path.clone(),
            target: None,
        };
        self.call(request, |state| state.create(path, kind, overwrite)).await
    }

    async fn get_status(&self, path: &EncodedPath) -> StoreResult<RemoteStatus> {
        let request = Request {
            verb: Verb::GetStatus,
            path: path.clone(),
            target: None,
        };
        self.call(request, |state| state.status(path)).await
    }

    async fn delete_path(&self, path: &EncodedPath, recursive: bool) -> StoreResult<()> {
        let request = Request {
            verb: Verb::DeletePath,
            path: path.clone(),
            target: None,
        };
        self.call(request, |state| state.delete(path, recursive)).await
    }

    async fn rename_path(&self, src: &EncodedPath, dst: &EncodedPath, overwrite: bool) -> StoreResult<()> {
        let request = Request {
            verb: Verb::RenamePath,
            path: src.clone(),
            target: Some(dst.clone()),
        };
        self.call(request, |state| state.rename(src, dst, overwrite)).await
    }

    async fn list_children(&self, path: &EncodedPath) -> StoreResult<Vec<RemoteStatus>> {
        let request = Request {
            verb: Verb::ListChildren,
            path: path.clone(),
            target: None,
        };
        self.call(request, |state| state.list(path)).await
    }
}
