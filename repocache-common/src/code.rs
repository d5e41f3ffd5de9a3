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
    fmt::Debug,
    hash::{BuildHasher, Hash},
};

use serde::{Deserialize, Serialize};

/// Storage-behavior hint carried by a cache key.
///
/// The hint describes how the repository stores the object the key refers to.
/// The cache consults it only to pick the reclamation mode of a fresh insert;
/// it never affects key identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageBehavior {
    /// The common case.
    #[default]
    Ordinary,
    /// Large objects that are rewritten often.
    ///
    /// Re-reading such an object from disk is expensive, so deployments may
    /// prefer to keep it cached until real memory pressure (soft mode).
    LargeAndMutable,
}

/// Identifier of a cached repository object.
///
/// Keys are externally owned and never mutated by the cache.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + Debug {
    /// Storage-behavior hint for this key.
    fn behavior(&self) -> StorageBehavior {
        StorageBehavior::Ordinary
    }
}

/// Opaque payload cached on behalf of the repository manager.
///
/// The cache holds shared references to payloads and never inspects or
/// mutates their contents.
pub trait Persistent: Send + Sync + 'static {}
impl<T> Persistent for T where T: Send + Sync + 'static {}

/// Hash builder for the sharded table.
pub trait HashBuilder: BuildHasher + Send + Sync + 'static {}
impl<T> HashBuilder for T where T: BuildHasher + Send + Sync + 'static {}

macro_rules! impl_key {
    ($($type:ty),* $(,)?) => {
        $(
            impl Key for $type {}
        )*
    };
}

impl_key! {
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    bool, char, String,
}

impl Key for Vec<u8> {}

impl Key for &'static str {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct BlobId(u64);

    impl Key for BlobId {
        fn behavior(&self) -> StorageBehavior {
            StorageBehavior::LargeAndMutable
        }
    }

    #[test]
    fn test_default_behavior() {
        assert_eq!(42u64.behavior(), StorageBehavior::Ordinary);
        assert_eq!(BlobId(42).behavior(), StorageBehavior::LargeAndMutable);
    }
}
