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

use std::{
    fmt::{Debug, Display},
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use equivalent::Equivalent;
use itertools::Itertools;
use parking_lot::RwLock;
use repocache_common::{
    code::{HashBuilder, Key, Persistent, StorageBehavior},
    fail_soft,
    metrics::Metrics,
    scope::Scope,
    strict_assert,
};

use crate::{
    ledger::{Charge, ReclaimLedger},
    queue::{ReclaimNotice, ReclamationQueue},
    shard::{Bucket, Shard},
    slot::{Reclaimable, ReclaimMode, Slot},
};

/// Construction parameters of the cache core.
pub struct RawCacheConfig<S>
where
    S: HashBuilder,
{
    /// Shard count; must be a power of two.
    pub shards: usize,
    /// Table-wide initial capacity, split evenly across shards.
    pub initial_capacity: usize,
    /// Reclaimable-entry budget of the ledger.
    pub reclaim_budget: usize,
    /// Insert `LargeAndMutable` keys in soft mode instead of weak mode.
    pub prefer_soft_for_large: bool,
    /// Hash builder shared by shard routing and in-shard lookup.
    pub hash_builder: S,
    /// Metrics of this cache instance.
    pub metrics: Metrics,
}

struct RawCacheInner<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    shards: Box<[RwLock<Shard<K, P>>]>,
    mask: usize,

    hash_builder: S,

    ledger: ReclaimLedger<K>,
    queue: ReclamationQueue<K>,
    tokens: AtomicU64,

    prefer_soft_for_large: bool,

    metrics: Metrics,
}

/// The sharded cache core.
///
/// Every operation touches at most one shard lock at a time; the ledger and
/// queue locks are orthogonal and never held while waiting on a shard lock.
pub struct RawCache<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    inner: Arc<RawCacheInner<K, P, S>>,
}

impl<K, P, S> Debug for RawCache<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCache")
            .field("shards", &self.inner.shards.len())
            .finish()
    }
}

impl<K, P, S> Clone for RawCache<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, P, S> RawCache<K, P, S>
where
    K: Key,
    P: Persistent,
    S: HashBuilder,
{
    /// Build the core from `config`.
    pub fn new(config: RawCacheConfig<S>) -> Self {
        assert!(
            config.shards.is_power_of_two(),
            "shards must be a power of two."
        );

        let shard_capacity = (config.initial_capacity / config.shards).max(1);
        let shards = (0..config.shards)
            .map(|_| Shard::with_capacity(shard_capacity))
            .map(RwLock::new)
            .collect_vec()
            .into_boxed_slice();

        let inner = RawCacheInner {
            mask: config.shards - 1,
            shards,
            hash_builder: config.hash_builder,
            ledger: ReclaimLedger::new(config.reclaim_budget),
            queue: ReclamationQueue::new(),
            tokens: AtomicU64::new(0),
            prefer_soft_for_large: config.prefer_soft_for_large,
            metrics: config.metrics,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Pin `payload` under `key`.
    ///
    /// Installs a pinned slot unconditionally, overwriting any prior slot,
    /// tombstones included. Pinned entries are never reclaimed; the caller
    /// releases them explicitly through [`RawCache::take_pinned`].
    pub fn pin(&self, key: K, payload: P) {
        let hash = self.hash(&key);
        let payload = Arc::new(payload);

        let old = self.inner.shards[self.shard(hash)]
            .write()
            .with(|mut shard| shard.insert(hash, key, Slot::Pinned(payload)));

        self.on_installed(old.as_ref(), true);
        // Drop the displaced slot outside the lock critical section.
        drop(old);
    }

    /// Insert `payload` under `key` as a reclaimable entry.
    ///
    /// Overwrites any prior slot. The entry starts in weak mode unless the
    /// key reports `LargeAndMutable` and the soft preference policy is on;
    /// a weak entry is promoted to soft on its first successful read.
    pub fn insert(&self, key: K, payload: P) {
        let hash = self.hash(&key);
        let token = self.next_token();
        let mode = self.mode_for(&key);
        let payload = Arc::new(payload);

        let old = self.inner.shards[self.shard(hash)].write().with(|mut shard| {
            shard.insert(
                hash,
                key.clone(),
                Slot::Reclaimable(Reclaimable::new(payload, mode, token)),
            )
        });
        self.on_installed(old.as_ref(), false);
        drop(old);

        let victims = self.inner.ledger.charge(key, token, mode);
        self.collect(victims);
    }

    /// Insert `payload` under `key` unless a live payload is already cached.
    ///
    /// A tombstone or a collected wrapper counts as absent. Returns the
    /// existing payload unchanged if one is present. Opportunistically drains
    /// the reclamation queue after releasing the shard lock.
    pub fn insert_if_absent(&self, key: K, payload: P) -> Option<Arc<P>> {
        let hash = self.hash(&key);
        let token = self.next_token();
        let mode = self.mode_for(&key);
        let payload = Arc::new(payload);

        let mut displaced = None;
        let prior = self.inner.shards[self.shard(hash)].write().with(|mut shard| {
            if let Some(bucket) = shard.get_mut(hash, &key) {
                match bucket.slot() {
                    Slot::Pinned(p) => return Some(p.clone()),
                    Slot::Reclaimable(r) if !r.is_collected() => return r.payload(),
                    _ => {}
                }
            }
            displaced = shard.insert(
                hash,
                key.clone(),
                Slot::Reclaimable(Reclaimable::new(payload, mode, token)),
            );
            None
        });

        if prior.is_none() {
            self.on_installed(displaced.as_ref(), false);
            drop(displaced);
            let victims = self.inner.ledger.charge(key, token, mode);
            self.collect(victims);
        }

        self.drain_queue();

        prior
    }

    /// Get the payload cached under `key`.
    ///
    /// Tombstoned keys read as absent; a collected wrapper also reads as
    /// absent while its slot waits for the queue drain. A weak entry served
    /// by this call is promoted to soft mode.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<P>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.get_inner(key, false)
    }

    /// Get the payload under `key`, a tombstoned one included.
    ///
    /// This is the historical contract of the repository cache: a logically
    /// removed key stays readable until it is physically compacted. New
    /// callers should prefer [`RawCache::get`].
    pub fn get_including_tombstones<Q>(&self, key: &Q) -> Option<Arc<P>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.get_inner(key, true)
    }

    fn get_inner<Q>(&self, key: &Q, include_tombstones: bool) -> Option<Arc<P>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash(key);

        let mut promote = None;
        let found = self.inner.shards[self.shard(hash)].read().with(|shard| {
            let bucket = shard.get(hash, key)?;
            match bucket.slot() {
                Slot::Pinned(payload) => Some(payload.clone()),
                Slot::Reclaimable(r) => {
                    let payload = r.payload()?;
                    if r.mode() == ReclaimMode::Weak {
                        promote = Some((bucket.key().clone(), r.token()));
                    }
                    Some(payload)
                }
                Slot::Tombstone(prior) if include_tombstones => prior.clone(),
                Slot::Tombstone(_) => None,
            }
        });

        match found {
            Some(_) => self.inner.metrics.hit.increment(1),
            None => self.inner.metrics.miss.increment(1),
        }

        if let Some((key, token)) = promote {
            self.promote(hash, key, token);
        }

        found
    }

    /// Logically delete `key`.
    ///
    /// Replaces the slot with a tombstone capturing the last-known payload,
    /// or the removed sentinel when there is none, so a racing reader
    /// observes the deletion instead of resurrecting the old object. The map
    /// entry itself stays until [`RawCache::remove_physically`].
    pub fn remove<Q>(&self, key: &Q)
    where
        Q: Hash + Equivalent<K> + ToOwned<Owned = K> + ?Sized,
    {
        let hash = self.hash(key);

        let prior_pinned = self.inner.shards[self.shard(hash)].write().with(|mut shard| {
            if let Some(bucket) = shard.get_mut(hash, key) {
                let captured = match bucket.slot() {
                    Slot::Pinned(p) => Some(p.clone()),
                    Slot::Reclaimable(r) => r.payload(),
                    // Re-removal keeps the last-known payload.
                    Slot::Tombstone(prior) => prior.clone(),
                };
                let was_pinned = bucket.slot().is_pinned();
                *bucket.slot_mut() = Slot::Tombstone(captured);
                return Some(was_pinned);
            }
            shard.insert(hash, key.to_owned(), Slot::Tombstone(None));
            None
        });

        self.inner.metrics.remove.increment(1);
        match prior_pinned {
            Some(true) => self.inner.metrics.pinned.decrement(1.0),
            Some(false) => {}
            None => self.inner.metrics.entries.increment(1.0),
        }
    }

    /// Erase the map entry of `key` if it is still a tombstone.
    ///
    /// Idempotent, and a no-op when the key was re-inserted after the logical
    /// deletion: the re-insertion wins.
    pub fn remove_physically<Q>(&self, key: &Q)
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash(key);

        let erased = self.inner.shards[self.shard(hash)].write().with(|mut shard| {
            let is_tombstone = shard
                .get(hash, key)
                .is_some_and(|bucket| bucket.slot().is_tombstone());
            if is_tombstone {
                shard.remove(hash, key)
            } else {
                None
            }
        });

        if let Some(slot) = erased {
            self.inner.metrics.compact.increment(1);
            self.inner.metrics.entries.decrement(1.0);
            drop(slot);
        }
    }

    /// Forcibly evict every non-pinned entry.
    ///
    /// Keys are snapshotted per shard under the read lock, then re-checked
    /// one at a time under the write lock so concurrent writers interleave;
    /// an entry pinned between the two steps survives the sweep.
    pub fn clear_reclaimable(&self) {
        for shard in self.inner.shards.iter() {
            let keys = shard.read().with(|shard| {
                shard
                    .buckets()
                    .map(|bucket| (bucket.hash(), bucket.key().clone()))
                    .collect_vec()
            });
            for (hash, key) in keys {
                let erased = shard.write().with(|mut shard| {
                    let evict = shard
                        .get(hash, &key)
                        .is_some_and(|bucket| !bucket.slot().is_pinned());
                    if evict {
                        shard.remove(hash, &key)
                    } else {
                        None
                    }
                });
                if let Some(slot) = erased {
                    self.inner.metrics.reclaim.increment(1);
                    self.inner.metrics.entries.decrement(1.0);
                    // Payload, if still held, dropped outside the lock.
                    drop(slot);
                }
            }
        }
    }

    /// Remove and return every pinned entry.
    ///
    /// Drains the reclamation queue first, then sweeps shard by shard. The
    /// caller is expected to persist the returned objects back to the
    /// repository before letting them go.
    pub fn take_pinned(&self) -> Vec<(K, Arc<P>)> {
        self.drain_queue();

        let mut taken = Vec::new();
        for shard in self.inner.shards.iter() {
            let keys = shard.read().with(|shard| {
                shard
                    .buckets()
                    .filter(|bucket| bucket.slot().is_pinned())
                    .map(|bucket| (bucket.hash(), bucket.key().clone()))
                    .collect_vec()
            });
            for (hash, key) in keys {
                let removed = shard.write().with(|mut shard| {
                    let pinned = shard
                        .get(hash, &key)
                        .is_some_and(|bucket| bucket.slot().is_pinned());
                    if pinned {
                        shard.remove(hash, &key)
                    } else {
                        None
                    }
                });
                if let Some(Slot::Pinned(payload)) = removed {
                    self.inner.metrics.entries.decrement(1.0);
                    self.inner.metrics.pinned.decrement(1.0);
                    taken.push((key, payload));
                }
            }
        }
        taken
    }

    /// Opportunistically drain the reclamation queue.
    ///
    /// Returns `false` without doing anything if another thread is already
    /// draining. Each notice erases its slot only if the slot still holds the
    /// exact collected wrapper the notice refers to; anything else means the
    /// entry was overwritten or swept in the meantime and the notice is
    /// stale.
    pub fn drain_queue(&self) -> bool {
        self.inner.queue.drain_with(|notice| {
            let hash = self.hash(&notice.key);
            let erased = self.inner.shards[self.shard(hash)].write().with(|mut shard| {
                let stale = match shard.get(hash, &notice.key).map(Bucket::slot) {
                    Some(Slot::Reclaimable(r)) if r.token() == notice.token => {
                        if r.is_collected() {
                            false
                        } else {
                            fail_soft!(
                                "reclamation notice for a wrapper that still holds its payload (token {})",
                                notice.token
                            );
                            true
                        }
                    }
                    _ => true,
                };
                if stale {
                    None
                } else {
                    shard.remove(hash, &notice.key)
                }
            });

            if let Some(slot) = erased {
                self.inner.metrics.drain.increment(1);
                self.inner.metrics.entries.decrement(1.0);
                drop(slot);
            } else {
                tracing::trace!(token = notice.token, "[cache]: stale reclamation notice skipped");
            }
        })
    }

    /// Whether a live payload is cached under `key`.
    ///
    /// Tombstones and collected wrappers read as absent.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash(key);
        self.inner.shards[self.shard(hash)]
            .read()
            .with(|shard| match shard.get(hash, key).map(Bucket::slot) {
                Some(Slot::Pinned(_)) => true,
                Some(Slot::Reclaimable(r)) => !r.is_collected(),
                _ => false,
            })
    }

    /// Map entries across all shards, tombstones and collected wrappers
    /// included.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Whether the table holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shard count of the table.
    pub fn shards(&self) -> usize {
        self.inner.shards.len()
    }

    /// Reclaimable-entry budget of the ledger.
    pub fn reclaim_budget(&self) -> usize {
        self.inner.ledger.budget()
    }

    /// Collect a point-in-time occupancy breakdown, one shard at a time.
    ///
    /// Shards are visited sequentially, so the snapshot is not atomic across
    /// shards; it is meant for diagnostics, not for control flow.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for shard in self.inner.shards.iter() {
            shard.read().with(|shard| {
                stats.per_shard.push(shard.len());
                for bucket in shard.buckets() {
                    match bucket.slot() {
                        Slot::Pinned(_) => stats.pinned += 1,
                        Slot::Reclaimable(r) if r.is_collected() => stats.collected += 1,
                        Slot::Reclaimable(_) => stats.reclaimable += 1,
                        Slot::Tombstone(_) => stats.tombstones += 1,
                    }
                }
            });
        }
        stats.pending_notices = self.inner.queue.len();
        stats.ledger_charges = self.inner.ledger.charges();
        stats
    }

    /// Map entries per shard, in shard order.
    pub fn distribution(&self) -> Vec<usize> {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.read().len())
            .collect_vec()
    }

    /// Drop the payloads of the given victims in place.
    ///
    /// For each victim the slot is re-fetched under its shard's write lock
    /// and collected only if it still holds the exact wrapper the charge
    /// refers to; a stale charge is skipped. A collected slot stays in the
    /// map until a reclamation queue drain erases it.
    fn collect(&self, victims: Vec<Charge<K>>) {
        for victim in victims {
            let hash = self.hash(&victim.key);
            let collected = self.inner.shards[self.shard(hash)].write().with(|mut shard| {
                let bucket = shard.get_mut(hash, &victim.key)?;
                let Slot::Reclaimable(reclaimable) = bucket.slot_mut() else {
                    return None;
                };
                if reclaimable.token() != victim.token || reclaimable.mode() != victim.mode {
                    return None;
                }
                let payload = reclaimable.collect();
                strict_assert!(reclaimable.is_collected());
                payload
            });

            if let Some(payload) = collected {
                tracing::trace!(token = victim.token, "[cache]: payload reclaimed");
                self.inner.metrics.reclaim.increment(1);
                self.inner.queue.push(ReclaimNotice {
                    key: victim.key,
                    token: victim.token,
                });
                // Dropped outside the lock critical section.
                drop(payload);
            }
        }
    }

    /// Promote a weak wrapper to soft mode.
    ///
    /// Optimistic: the slot is re-fetched under the write lock and the
    /// promotion is dropped on the floor if it no longer holds the same
    /// wrapper the triggering read saw.
    fn promote(&self, hash: u64, key: K, token: u64) {
        let promoted = self.inner.shards[self.shard(hash)].write().with(|mut shard| {
            let Some(bucket) = shard.get_mut(hash, &key) else {
                return false;
            };
            let Slot::Reclaimable(reclaimable) = bucket.slot_mut() else {
                return false;
            };
            if reclaimable.token() != token
                || reclaimable.mode() != ReclaimMode::Weak
                || reclaimable.is_collected()
            {
                return false;
            }
            reclaimable.promote();
            true
        });

        if promoted {
            tracing::trace!(token, "[cache]: weak wrapper promoted to soft");
            self.inner.ledger.promote(key, token);
        }
    }

    fn on_installed(&self, old: Option<&Slot<P>>, pinned: bool) {
        match old {
            None => {
                self.inner.metrics.insert.increment(1);
                self.inner.metrics.entries.increment(1.0);
            }
            Some(_) => self.inner.metrics.replace.increment(1),
        }
        if pinned {
            self.inner.metrics.pinned.increment(1.0);
        }
        if let Some(Slot::Pinned(_)) = old {
            self.inner.metrics.pinned.decrement(1.0);
        }
    }

    fn mode_for(&self, key: &K) -> ReclaimMode {
        match key.behavior() {
            StorageBehavior::LargeAndMutable if self.inner.prefer_soft_for_large => ReclaimMode::Soft,
            _ => ReclaimMode::Weak,
        }
    }

    fn shard(&self, hash: u64) -> usize {
        hash as usize & self.inner.mask
    }

    fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.inner.hash_builder.hash_one(key)
    }

    fn next_token(&self) -> u64 {
        self.inner.tokens.fetch_add(1, Ordering::Relaxed)
    }
}

/// Point-in-time occupancy breakdown of the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Pinned entries.
    pub pinned: usize,
    /// Reclaimable entries still holding their payload.
    pub reclaimable: usize,
    /// Collected wrappers awaiting a queue drain.
    pub collected: usize,
    /// Tombstones awaiting physical compaction.
    pub tombstones: usize,
    /// Map entries per shard, in shard order.
    pub per_shard: Vec<usize>,
    /// Notices pending in the reclamation queue.
    pub pending_notices: usize,
    /// Charges tracked by the reclaim ledger, stale ones included.
    pub ledger_charges: usize,
}

impl CacheStats {
    /// Total map entries.
    pub fn entries(&self) -> usize {
        self.pinned + self.reclaimable + self.collected + self.tombstones
    }
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "entries: {} (pinned: {}, reclaimable: {}, collected: {}, tombstones: {})",
            self.entries(),
            self.pinned,
            self.reclaimable,
            self.collected,
            self.tombstones
        )?;
        writeln!(
            f,
            "pending notices: {}, ledger charges: {}",
            self.pending_notices, self.ledger_charges
        )?;
        write!(f, "distribution: [{}]", self.per_shard.iter().join(" "))
    }
}
