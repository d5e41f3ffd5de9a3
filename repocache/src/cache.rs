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

use std::{fmt::Debug, hash::Hash, sync::Arc};

use ahash::RandomState;
use equivalent::Equivalent;
use repocache_common::{
    code::{HashBuilder, Key, Persistent},
    error::{Error, ErrorKind, Result},
    metrics::Metrics,
};

use crate::raw::{CacheStats, RawCache, RawCacheConfig};

/// Reclaimable-entry budget used when none is configured.
pub const DEFAULT_RECLAIM_BUDGET: usize = 65_536;

/// Shard count and table-wide initial capacity for the host's concurrency
/// level.
///
/// Few cores get fewer, larger shards; a wide machine gets more shards to
/// bound write-lock contention, each starting small.
fn concurrency_defaults() -> (usize, usize) {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if cores <= 4 {
        (32, 512)
    } else {
        (128, 128)
    }
}

/// In-memory cache fronting an on-disk object repository.
///
/// Holds transient, reconstructible objects under concurrent read/write
/// pressure. Entries are reclaimable by default and evicted deterministically
/// under a configurable budget; [`RepositoryCache::pin`] installs entries the
/// reclamation machinery must never drop, and [`RepositoryCache::remove`] is
/// a logical deletion visible to all readers before physical compaction.
///
/// Cloning is shallow; clones share the same sharded table.
pub struct RepositoryCache<K, P, S = RandomState>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    raw: RawCache<K, P, S>,
}

impl<K, P, S> Debug for RepositoryCache<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryCache")
            .field("shards", &self.raw.shards())
            .finish()
    }
}

impl<K, P, S> Clone for RepositoryCache<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
        }
    }
}

impl<K, P, S> RepositoryCache<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    /// Pin `payload` under `key`, overwriting any prior slot.
    ///
    /// Pinned entries survive reclamation and sweeps; release them with
    /// [`RepositoryCache::take_pinned`].
    pub fn pin(&self, key: K, payload: P) {
        self.raw.pin(key, payload)
    }

    /// Insert `payload` under `key` as a reclaimable entry, overwriting any
    /// prior slot.
    pub fn insert(&self, key: K, payload: P) {
        self.raw.insert(key, payload)
    }

    /// Insert `payload` under `key` unless a live payload is already cached,
    /// returning the existing payload if so.
    ///
    /// A tombstoned or already-collected entry counts as absent.
    pub fn insert_if_absent(&self, key: K, payload: P) -> Option<Arc<P>> {
        self.raw.insert_if_absent(key, payload)
    }

    /// Get the payload cached under `key`; tombstoned keys read as absent.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<P>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.raw.get(key)
    }

    /// Get the payload under `key`, returning the last-known payload of a
    /// tombstoned entry.
    ///
    /// The historical repository-cache contract; prefer
    /// [`RepositoryCache::get`].
    pub fn get_including_tombstones<Q>(&self, key: &Q) -> Option<Arc<P>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.raw.get_including_tombstones(key)
    }

    /// Logically delete `key`, leaving a tombstone until
    /// [`RepositoryCache::remove_physically`].
    pub fn remove<Q>(&self, key: &Q)
    where
        Q: Hash + Equivalent<K> + ToOwned<Owned = K> + ?Sized,
    {
        self.raw.remove(key)
    }

    /// Erase the entry of `key` if it is still a tombstone. Idempotent.
    pub fn remove_physically<Q>(&self, key: &Q)
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.raw.remove_physically(key)
    }

    /// Forcibly evict every non-pinned entry.
    pub fn clear_reclaimable(&self) {
        self.raw.clear_reclaimable()
    }

    /// Remove and return every pinned entry, for the caller to persist back
    /// to the repository.
    pub fn take_pinned(&self) -> Vec<(K, Arc<P>)> {
        self.raw.take_pinned()
    }

    /// Whether a live payload is cached under `key`.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.raw.contains(key)
    }

    /// Map entries across all shards, tombstones included.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the table holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Shard count of the table.
    pub fn shards(&self) -> usize {
        self.raw.shards()
    }

    /// Reclaimable-entry budget.
    pub fn reclaim_budget(&self) -> usize {
        self.raw.reclaim_budget()
    }

    /// Point-in-time occupancy breakdown for diagnostics.
    pub fn stats(&self) -> CacheStats {
        self.raw.stats()
    }

    /// Map entries per shard, in shard order.
    pub fn distribution(&self) -> Vec<usize> {
        self.raw.distribution()
    }
}

/// Builder of [`RepositoryCache`].
#[derive(Debug)]
pub struct RepositoryCacheBuilder<S = RandomState>
where
    S: HashBuilder,
{
    name: String,
    shards: Option<usize>,
    initial_capacity: Option<usize>,
    reclaim_budget: usize,
    prefer_soft_for_large: bool,
    hash_builder: S,
}

impl RepositoryCacheBuilder<RandomState> {
    /// Create a builder; `name` labels the instance's metrics.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shards: None,
            initial_capacity: None,
            reclaim_budget: DEFAULT_RECLAIM_BUDGET,
            prefer_soft_for_large: true,
            hash_builder: RandomState::default(),
        }
    }
}

impl<S> RepositoryCacheBuilder<S>
where
    S: HashBuilder,
{
    /// Override the shard count. Must be a power of two.
    ///
    /// Defaults to 32 on hosts with at most 4 cores and 128 otherwise.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    /// Override the table-wide initial capacity, split evenly across shards.
    ///
    /// Defaults to 512 on hosts with at most 4 cores and 128 otherwise.
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = Some(initial_capacity);
        self
    }

    /// Set the reclaimable-entry budget.
    pub fn with_reclaim_budget(mut self, reclaim_budget: usize) -> Self {
        self.reclaim_budget = reclaim_budget;
        self
    }

    /// Insert `LargeAndMutable` keys in soft mode instead of weak mode.
    ///
    /// On by default.
    pub fn with_soft_preference(mut self, prefer_soft_for_large: bool) -> Self {
        self.prefer_soft_for_large = prefer_soft_for_large;
        self
    }

    /// Use a custom hash builder.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> RepositoryCacheBuilder<OS>
    where
        OS: HashBuilder,
    {
        RepositoryCacheBuilder {
            name: self.name,
            shards: self.shards,
            initial_capacity: self.initial_capacity,
            reclaim_budget: self.reclaim_budget,
            prefer_soft_for_large: self.prefer_soft_for_large,
            hash_builder,
        }
    }

    /// Build the cache.
    pub fn build<K, P>(self) -> Result<RepositoryCache<K, P, S>>
    where
        K: Key,
        P: Persistent,
    {
        let (auto_shards, auto_capacity) = concurrency_defaults();
        let shards = self.shards.unwrap_or(auto_shards);
        if !shards.is_power_of_two() {
            return Err(
                Error::new(ErrorKind::Config, "shard count must be a power of two")
                    .with_context("shards", shards),
            );
        }
        let initial_capacity = self.initial_capacity.unwrap_or(auto_capacity);

        Ok(RepositoryCache {
            raw: RawCache::new(RawCacheConfig {
                shards,
                initial_capacity,
                reclaim_budget: self.reclaim_budget,
                prefer_soft_for_large: self.prefer_soft_for_large,
                hash_builder: self.hash_builder,
                metrics: Metrics::new(&self.name),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_tuned_defaults() {
        let cache = RepositoryCacheBuilder::new("auto")
            .build::<u64, u64>()
            .unwrap();

        let (shards, _) = concurrency_defaults();
        assert_eq!(cache.shards(), shards);
        assert!(cache.shards().is_power_of_two());
        assert_eq!(cache.reclaim_budget(), DEFAULT_RECLAIM_BUDGET);
    }

    #[test]
    fn test_builder_rejects_non_power_of_two() {
        let res = RepositoryCacheBuilder::new("bad")
            .with_shards(12)
            .build::<u64, u64>();

        let err = res.expect_err("12 shards must be rejected");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_facade_round_trip() {
        let cache = RepositoryCacheBuilder::new("facade")
            .with_shards(8)
            .with_initial_capacity(64)
            .build::<String, Vec<u8>>()
            .unwrap();

        cache.insert("a.rs".to_string(), b"struct A;".to_vec());
        cache.pin("b.rs".to_string(), b"struct B;".to_vec());

        assert!(cache.contains("a.rs"));
        assert_eq!(cache.get("a.rs").map(|p| p.len()), Some(9));

        cache.remove("a.rs");
        assert!(cache.get("a.rs").is_none());
        assert!(cache.get_including_tombstones("a.rs").is_some());
        cache.remove_physically("a.rs");
        assert!(cache.get_including_tombstones("a.rs").is_none());

        let pinned = cache.take_pinned();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].0, "b.rs");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_custom_hash_builder() {
        let cache = RepositoryCacheBuilder::new("custom-hash")
            .with_shards(4)
            .with_hash_builder(std::hash::RandomState::new())
            .build::<u64, u64>()
            .unwrap();

        cache.insert(1, 2);
        assert_eq!(cache.get(&1).as_deref(), Some(&2));
    }

    #[test]
    fn test_clones_share_the_table() {
        let cache = RepositoryCacheBuilder::new("clone")
            .with_shards(4)
            .build::<u64, u64>()
            .unwrap();
        let other = cache.clone();

        cache.insert(1, 2);
        assert_eq!(other.get(&1).as_deref(), Some(&2));
    }
}
