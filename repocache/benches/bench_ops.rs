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

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use repocache::RepositoryCacheBuilder;

fn bench_ops(c: &mut Criterion) {
    let cache = RepositoryCacheBuilder::new("bench")
        .with_shards(16)
        .with_reclaim_budget(1 << 20)
        .build::<u64, u64>()
        .unwrap();

    c.bench_function("insert", |b| {
        let mut i = 0u64;
        b.iter(|| {
            cache.insert(black_box(i), i);
            i = i.wrapping_add(1);
        })
    });

    for k in 0..1024 {
        cache.insert(k, k);
    }

    c.bench_function("get_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(cache.get(&(i % 1024)));
            i = i.wrapping_add(1);
        })
    });

    c.bench_function("get_miss", |b| {
        b.iter(|| black_box(cache.get(&u64::MAX)))
    });

    c.bench_function("insert_if_absent_hit", |b| {
        b.iter(|| black_box(cache.insert_if_absent(1, 1)))
    });
}

criterion_group!(benches, bench_ops);
criterion_main!(benches);
