// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical filesystem semantics over a flat, REST-style remote store.
//!
//! [`RemoteFS`] turns `mkdir`, `create`, `delete`, `rename` and `list` into
//! single-path remote calls. Paths are percent-escaped by [`PathCodec`] so
//! any name without a [`codec::DISALLOWED`] character survives the wire.
//! Calls that may be repeated safely are retried; a rename or exclusive
//! create whose outcome is unknown is settled by reading remote state
//! before anything is sent again.
//!
//! ```no_run
//! use remotefs::{FsConfig, MemoryStore, Path, RemoteFS};
//! use std::sync::Arc;
//!
//! # async fn demo() -> remotefs::Result<()> {
//! let fs = RemoteFS::new(Arc::new(MemoryStore::default()), FsConfig::default());
//! let dir = Path::parse("/reports/2025 Q1")?;
//! fs.mkdir(&dir, true).await?;
//! fs.create(&dir.join("summary *final*")?, false).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
mod error;
pub mod executor;
mod fs;
pub mod guard;
pub mod memory;
mod path;
pub mod store;

pub use codec::{EncodedPath, PathCodec};
pub use config::{ConfigError, ConsistencyPolicy, DeleteMissing, FsConfig, RenameOverwrite, RetryPolicy};
pub use error::{Error, ErrorKind, Result};
pub use fs::RemoteFS;
pub use guard::Visibility;
pub use memory::MemoryStore;
pub use path::Path;
pub use store::{NodeKind, NodeStatus, RemoteStatus, RemoteStore, StoreError, StoreResult, Verb};

#[cfg(test)]
mod tests;
