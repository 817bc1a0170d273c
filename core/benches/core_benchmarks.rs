use criterion::{Criterion, black_box, criterion_group, criterion_main};

use framegraph_core::pool::{Handle, HandlePool};

// ---------------------------------------------------------------------------
// Handle pool
// ---------------------------------------------------------------------------

fn bench_pool_add_remove(c: &mut Criterion) {
    c.bench_function("pool_add_remove_1024", |b| {
        let mut pool = HandlePool::with_capacity(1024);
        let mut handles = Vec::with_capacity(1024);
        b.iter(|| {
            for i in 0..1024u32 {
                handles.push(pool.add(black_box(i)));
            }
            for h in handles.drain(..) {
                let _ = black_box(pool.remove(h));
            }
        });
    });
}

fn bench_pool_get(c: &mut Criterion) {
    let mut pool = HandlePool::new();
    let handles: Vec<Handle<u64>> = (0..4096u64).map(|i| pool.add(i)).collect();

    c.bench_function("pool_get_4096", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for h in &handles {
                if let Ok(v) = pool.get(*h) {
                    sum += *v;
                }
            }
            black_box(sum)
        });
    });
}

fn bench_pool_stale_lookup(c: &mut Criterion) {
    let mut pool = HandlePool::new();
    let stale: Vec<Handle<u64>> = (0..1024u64).map(|i| pool.add(i)).collect();
    for h in &stale {
        let _ = pool.remove(*h);
    }
    for i in 0..1024u64 {
        pool.add(i);
    }

    c.bench_function("pool_stale_lookup_1024", |b| {
        b.iter(|| {
            let misses = stale.iter().filter(|h| pool.get(**h).is_err()).count();
            black_box(misses)
        });
    });
}

criterion_group!(
    benches,
    bench_pool_add_remove,
    bench_pool_get,
    bench_pool_stale_lookup
);
criterion_main!(benches);
