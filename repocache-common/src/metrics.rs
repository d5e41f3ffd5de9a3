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

use std::fmt::Debug;

use metrics::{counter, gauge, Counter, Gauge};

/// Operation counters and occupancy gauges for one cache instance.
///
/// Registered against the `metrics` facade under the instance name, so
/// multiple caches in one process stay distinguishable.
#[derive(Clone)]
pub struct Metrics {
    /// Fresh slot installed.
    pub insert: Counter,
    /// Existing slot overwritten by an insertion.
    pub replace: Counter,
    /// Lookup returned a live payload.
    pub hit: Counter,
    /// Lookup returned nothing.
    pub miss: Counter,
    /// Logical deletion (tombstone installed).
    pub remove: Counter,
    /// Reclaimable payload dropped under budget pressure or a forced sweep.
    pub reclaim: Counter,
    /// Tombstone physically erased.
    pub compact: Counter,
    /// Collected slot erased by a reclamation queue drain.
    pub drain: Counter,

    /// Map entries, tombstones included.
    pub entries: Gauge,
    /// Pinned entries.
    pub pinned: Gauge,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

impl Metrics {
    /// Register the metrics of a cache instance under `name`.
    pub fn new(name: &str) -> Self {
        let insert = counter!("repocache_op_total", "name" => name.to_string(), "op" => "insert");
        let replace = counter!("repocache_op_total", "name" => name.to_string(), "op" => "replace");
        let hit = counter!("repocache_op_total", "name" => name.to_string(), "op" => "hit");
        let miss = counter!("repocache_op_total", "name" => name.to_string(), "op" => "miss");
        let remove = counter!("repocache_op_total", "name" => name.to_string(), "op" => "remove");
        let reclaim = counter!("repocache_op_total", "name" => name.to_string(), "op" => "reclaim");
        let compact = counter!("repocache_op_total", "name" => name.to_string(), "op" => "compact");
        let drain = counter!("repocache_op_total", "name" => name.to_string(), "op" => "drain");

        let entries = gauge!("repocache_entries", "name" => name.to_string());
        let pinned = gauge!("repocache_pinned", "name" => name.to_string());

        Self {
            insert,
            replace,
            hit,
            miss,
            remove,
            reclaim,
            compact,
            drain,
            entries,
            pinned,
        }
    }
}
