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

use std::{fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};

/// How a reclaimable payload responds to memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReclaimMode {
    /// Dropped eagerly once the reclaim budget overflows.
    ///
    /// The default insertion mode; a weak payload that survives until its
    /// first read is promoted to [`ReclaimMode::Soft`].
    Weak,
    /// Dropped only when no weak payload is left to reclaim.
    Soft,
}

/// A reclaimable wrapper around a payload.
///
/// The `token` is the wrapper's identity. Post-collection cleanup and the
/// optimistic weak-to-soft promotion both re-fetch the slot by key and act
/// only if the token still matches, so a stale actor never touches a slot
/// that has been legitimately replaced.
pub struct Reclaimable<P> {
    payload: Option<Arc<P>>,
    mode: ReclaimMode,
    token: u64,
}

impl<P> Reclaimable<P> {
    pub fn new(payload: Arc<P>, mode: ReclaimMode, token: u64) -> Self {
        Self {
            payload: Some(payload),
            mode,
            token,
        }
    }

    /// Shared reference to the payload, if it has not been collected.
    pub fn payload(&self) -> Option<Arc<P>> {
        self.payload.clone()
    }

    pub fn mode(&self) -> ReclaimMode {
        self.mode
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Whether the payload has been dropped while the slot awaits cleanup.
    pub fn is_collected(&self) -> bool {
        self.payload.is_none()
    }

    /// Flip the wrapper to soft mode.
    ///
    /// Caller must hold the shard write lock and have re-validated the token.
    pub fn promote(&mut self) {
        self.mode = ReclaimMode::Soft;
    }

    /// Drop the payload in place.
    ///
    /// The slot stays in the map for the reclamation queue to erase later.
    pub fn collect(&mut self) -> Option<Arc<P>> {
        self.payload.take()
    }
}

/// Per-key cache state.
pub enum Slot<P> {
    /// Strongly held; survives every sweep and is only released explicitly.
    Pinned(Arc<P>),
    /// Subject to the reclamation policy.
    Reclaimable(Reclaimable<P>),
    /// Logical deletion marker, retained until physical compaction.
    ///
    /// Records the last-known payload for observability; `None` is the shared
    /// "removed with no prior value" sentinel.
    Tombstone(Option<Arc<P>>),
}

impl<P> Slot<P> {
    pub fn is_pinned(&self) -> bool {
        matches!(self, Slot::Pinned(_))
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Slot::Tombstone(_))
    }
}

impl<P> Debug for Slot<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Pinned(_) => f.debug_tuple("Pinned").finish(),
            Slot::Reclaimable(r) => f
                .debug_struct("Reclaimable")
                .field("mode", &r.mode)
                .field("token", &r.token)
                .field("collected", &r.is_collected())
                .finish(),
            Slot::Tombstone(prior) => f.debug_tuple("Tombstone").field(&prior.is_some()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_is_terminal() {
        let mut r = Reclaimable::new(Arc::new(7u64), ReclaimMode::Weak, 1);
        assert!(!r.is_collected());
        assert!(r.collect().is_some());
        assert!(r.is_collected());
        assert!(r.collect().is_none());
        assert!(r.payload().is_none());
    }

    #[test]
    fn test_promote_is_idempotent() {
        let mut r = Reclaimable::new(Arc::new(7u64), ReclaimMode::Weak, 1);
        r.promote();
        r.promote();
        assert_eq!(r.mode(), ReclaimMode::Soft);
    }
}
