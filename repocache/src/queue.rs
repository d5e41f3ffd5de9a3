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

/// Notice that a reclaimable wrapper's payload has been dropped and its slot
/// awaits cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimNotice<K> {
    /// Key of the collected slot.
    pub key: K,
    /// Identity of the exact wrapper that was collected.
    pub token: u64,
}

/// Channel through which collected-wrapper notices reach slot cleanup.
///
/// Cleanup is eventual, not immediate: notices accumulate until some caller
/// drains them, and draining is skipped entirely while another thread drains.
#[derive(Debug)]
pub struct ReclamationQueue<K> {
    notices: Mutex<VecDeque<ReclaimNotice<K>>>,
    drainer: Mutex<()>,
}

impl<K> Default for ReclamationQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ReclamationQueue<K> {
    pub fn new() -> Self {
        Self {
            notices: Mutex::new(VecDeque::new()),
            drainer: Mutex::new(()),
        }
    }

    pub fn push(&self, notice: ReclaimNotice<K>) {
        self.notices.lock().push_back(notice);
    }

    pub fn len(&self) -> usize {
        self.notices.lock().len()
    }

    /// Drain pending notices through `f`.
    ///
    /// Non-blocking: returns `false` without draining if another thread holds
    /// the drain guard. `f` runs outside the queue lock, so it is free to
    /// take a shard lock per notice.
    pub fn drain_with<F>(&self, mut f: F) -> bool
    where
        F: FnMut(ReclaimNotice<K>),
    {
        let Some(_guard) = self.drainer.try_lock() else {
            return false;
        };
        loop {
            let Some(notice) = self.notices.lock().pop_front() else {
                break;
            };
            f(notice);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_in_order() {
        let queue = ReclamationQueue::new();
        queue.push(ReclaimNotice { key: 1u64, token: 1 });
        queue.push(ReclaimNotice { key: 2u64, token: 2 });
        assert_eq!(queue.len(), 2);

        let mut seen = vec![];
        assert!(queue.drain_with(|notice| seen.push(notice.key)));
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_drain_is_exclusive() {
        let queue = ReclamationQueue::new();
        queue.push(ReclaimNotice { key: 1u64, token: 1 });

        let _guard = queue.drainer.lock();
        assert!(!queue.drain_with(|_| panic!("must not drain")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_notices_pushed_mid_drain_are_drained() {
        let queue = ReclamationQueue::new();
        queue.push(ReclaimNotice { key: 0u64, token: 0 });

        let mut seen = 0;
        queue.drain_with(|notice| {
            seen += 1;
            if notice.key < 3 {
                queue.push(ReclaimNotice {
                    key: notice.key + 1,
                    token: notice.token + 1,
                });
            }
        });
        assert_eq!(seen, 4);
    }
}
