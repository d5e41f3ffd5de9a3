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

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::slot::ReclaimMode;

/// A reclaimable wrapper registered with the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge<K> {
    pub key: K,
    pub token: u64,
    pub mode: ReclaimMode,
}

/// Deterministic replacement for collector-driven reclamation.
///
/// Every reclaimable wrapper is charged against a fixed entry budget. While
/// the ledger is over budget it yields the oldest weak charges first, then
/// soft ones. Charges are not withdrawn when a slot is overwritten, swept, or
/// promoted; a charge is validated against the live wrapper (token and mode)
/// at collection time and a stale one dies as a no-op.
#[derive(Debug)]
pub struct ReclaimLedger<K> {
    inner: Mutex<LedgerInner<K>>,
    budget: usize,
}

#[derive(Debug)]
struct LedgerInner<K> {
    weak: VecDeque<Charge<K>>,
    soft: VecDeque<Charge<K>>,
}

impl<K> ReclaimLedger<K> {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                weak: VecDeque::new(),
                soft: VecDeque::new(),
            }),
            budget,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Charge a fresh wrapper, returning the victims to collect.
    ///
    /// Victims come oldest-first from the weak queue; the soft queue is only
    /// tapped once no weak charge is left.
    pub fn charge(&self, key: K, token: u64, mode: ReclaimMode) -> Vec<Charge<K>> {
        let mut inner = self.inner.lock();
        let charge = Charge { key, token, mode };
        match mode {
            ReclaimMode::Weak => inner.weak.push_back(charge),
            ReclaimMode::Soft => inner.soft.push_back(charge),
        }

        let mut victims = Vec::new();
        while inner.weak.len() + inner.soft.len() > self.budget {
            let victim = match inner.weak.pop_front() {
                Some(victim) => Some(victim),
                None => inner.soft.pop_front(),
            };
            match victim {
                Some(victim) => victims.push(victim),
                None => break,
            }
        }
        victims
    }

    /// Re-charge a wrapper promoted to soft mode.
    ///
    /// The original weak charge stays behind; its mode no longer matches the
    /// wrapper, so it dies at collection time.
    pub fn promote(&self, key: K, token: u64) {
        self.inner.lock().soft.push_back(Charge {
            key,
            token,
            mode: ReclaimMode::Soft,
        });
    }

    /// Charges currently tracked, stale ones included.
    pub fn charges(&self) -> usize {
        let inner = self.inner.lock();
        inner.weak.len() + inner.soft.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_budget_yields_no_victims() {
        let ledger = ReclaimLedger::new(2);
        assert!(ledger.charge(1u64, 1, ReclaimMode::Weak).is_empty());
        assert!(ledger.charge(2u64, 2, ReclaimMode::Weak).is_empty());
        assert_eq!(ledger.charges(), 2);
    }

    #[test]
    fn test_overflow_yields_oldest_weak_first() {
        let ledger = ReclaimLedger::new(2);
        ledger.charge(1u64, 1, ReclaimMode::Weak);
        ledger.charge(2u64, 2, ReclaimMode::Soft);
        let victims = ledger.charge(3u64, 3, ReclaimMode::Weak);

        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].key, 1);
        assert_eq!(victims[0].mode, ReclaimMode::Weak);
    }

    #[test]
    fn test_soft_tapped_only_when_weak_exhausted() {
        let ledger = ReclaimLedger::new(1);
        ledger.charge(1u64, 1, ReclaimMode::Soft);
        let victims = ledger.charge(2u64, 2, ReclaimMode::Soft);

        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].key, 1);
        assert_eq!(victims[0].mode, ReclaimMode::Soft);
    }

    #[test]
    fn test_promotion_recharges() {
        let ledger = ReclaimLedger::new(8);
        ledger.charge(1u64, 1, ReclaimMode::Weak);
        ledger.promote(1u64, 1);
        // One live wrapper, two tracked charges; the weak one is now stale.
        assert_eq!(ledger.charges(), 2);
    }
}
