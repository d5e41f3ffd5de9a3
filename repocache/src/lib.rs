// Copyright 2025 repocache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A sharded in-memory cache for repository object managers.
//!
//! `repocache` sits in front of a larger on-disk object repository, such as
//! the one backing a code-model/indexing subsystem, and holds transient,
//! reconstructible objects under heavy concurrent read/write pressure. Disk
//! fallback stays with the caller; this crate is a pure in-process component.
//!
//! Three kinds of entries live in the table:
//!
//! - **Reclaimable** entries ([`RepositoryCache::insert`]) are dropped
//!   deterministically, oldest weak entries first, once a configurable budget
//!   overflows. A weak entry that proves useful (it gets read) is promoted to
//!   soft mode and outlives the remaining weak ones.
//! - **Pinned** entries ([`RepositoryCache::pin`]) are never dropped by the
//!   reclamation machinery; the caller collects them with
//!   [`RepositoryCache::take_pinned`] when it is ready to persist them.
//! - **Tombstones** ([`RepositoryCache::remove`]) make a logical deletion
//!   visible to every reader before the entry is physically compacted with
//!   [`RepositoryCache::remove_physically`].
//!
//! Keys are distributed over independently locked shards, so operations on
//! different keys rarely contend and no operation ever takes more than one
//! shard lock.
//!
//! ```
//! use repocache::RepositoryCacheBuilder;
//!
//! let cache = RepositoryCacheBuilder::new("code-model")
//!     .with_shards(8)
//!     .build::<u64, Vec<u8>>()
//!     .unwrap();
//!
//! cache.insert(1, b"class Foo".to_vec());
//! assert!(cache.get(&1).is_some());
//!
//! cache.remove(&1);
//! assert!(cache.get(&1).is_none());
//!
//! cache.pin(2, b"dirty object".to_vec());
//! let to_persist = cache.take_pinned();
//! assert_eq!(to_persist.len(), 1);
//! ```

mod cache;
mod ledger;
mod queue;
mod raw;
mod shard;
mod slot;

pub use cache::{RepositoryCache, RepositoryCacheBuilder, DEFAULT_RECLAIM_BUDGET};
pub use raw::{CacheStats, RawCache, RawCacheConfig};
pub use repocache_common::{
    code::{HashBuilder, Key, Persistent, StorageBehavior},
    error::{Error, ErrorKind, Result},
    metrics::Metrics,
};
pub use slot::ReclaimMode;
