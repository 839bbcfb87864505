//! Interning throughput without collector pressure: a single mutator, no
//! collector thread, so the numbers isolate trie navigation and the barrier.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

fn bench_intern(c: &mut Criterion) {
    loam_gc::enter();

    let keys: Vec<Vec<u8>> = (0..1024).map(|i| format!("key-{i:04}").into_bytes()).collect();

    // Pre-populate so the steady-state path is "found, upgrade".
    for key in &keys {
        black_box(loam_intern::intern(key));
    }

    let mut cursor = 0usize;
    c.bench_function("intern/hit", |b| {
        b.iter(|| {
            let key = &keys[cursor & 1023];
            cursor = cursor.wrapping_add(1);
            black_box(loam_intern::intern(key))
        })
    });

    c.bench_function("lookup/hit", |b| {
        b.iter(|| {
            let key = &keys[cursor & 1023];
            cursor = cursor.wrapping_add(1);
            black_box(loam_intern::lookup(key))
        })
    });

    loam_gc::leave();
}

criterion_group!(benches, bench_intern);
criterion_main!(benches);
