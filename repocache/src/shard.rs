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

use equivalent::Equivalent;
use hashbrown::hash_table::{Entry as TableEntry, HashTable};

use crate::slot::Slot;

/// One entry of a shard's table: a key, its slot, and the key's full hash.
///
/// The hash is computed once at the cache boundary and reused for shard
/// routing, lookup, and rehashing.
pub struct Bucket<K, P> {
    hash: u64,
    key: K,
    slot: Slot<P>,
}

impl<K, P> Bucket<K, P> {
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn slot(&self) -> &Slot<P> {
        &self.slot
    }

    pub fn slot_mut(&mut self) -> &mut Slot<P> {
        &mut self.slot
    }
}

/// One independently locked partition of the key space.
///
/// Not thread-safe on its own; the cache wraps each shard in a `RwLock`.
pub struct Shard<K, P> {
    table: HashTable<Bucket<K, P>>,
}

impl<K, P> Shard<K, P>
where
    K: Eq,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn get<Q>(&self, hash: u64, key: &Q) -> Option<&Bucket<K, P>>
    where
        Q: Equivalent<K> + ?Sized,
    {
        self.table.find(hash, |b| key.equivalent(&b.key))
    }

    pub fn get_mut<Q>(&mut self, hash: u64, key: &Q) -> Option<&mut Bucket<K, P>>
    where
        Q: Equivalent<K> + ?Sized,
    {
        self.table.find_mut(hash, |b| key.equivalent(&b.key))
    }

    /// Install `slot` under `key`, returning the displaced slot if any.
    pub fn insert(&mut self, hash: u64, key: K, slot: Slot<P>) -> Option<Slot<P>> {
        match self.table.entry(hash, |b| b.key == key, |b| b.hash) {
            TableEntry::Occupied(mut o) => {
                let old = std::mem::replace(&mut o.get_mut().slot, slot);
                Some(old)
            }
            TableEntry::Vacant(v) => {
                v.insert(Bucket { hash, key, slot });
                None
            }
        }
    }

    pub fn remove<Q>(&mut self, hash: u64, key: &Q) -> Option<Slot<P>>
    where
        Q: Equivalent<K> + ?Sized,
    {
        match self.table.entry(hash, |b| key.equivalent(&b.key), |b| b.hash) {
            TableEntry::Occupied(o) => {
                let (bucket, _) = o.remove();
                Some(bucket.slot)
            }
            TableEntry::Vacant(_) => None,
        }
    }

    pub fn buckets(&self) -> impl Iterator<Item = &Bucket<K, P>> {
        self.table.iter()
    }
}
