use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

// Import the cache and the in-memory device from the crate
use bcache::{BLOCK_SIZE, BufCache, CacheConfig, MemDevice};

// Test configuration
const THREAD_COUNT: usize = 8;
const OPERATIONS_PER_THREAD: usize = 5_000;
const POOL_SIZE: usize = 64;
const BUCKET_COUNT: usize = 13;

fn new_cache() -> Arc<BufCache> {
    let device = Arc::new(MemDevice::new(BLOCK_SIZE));
    Arc::new(BufCache::init(CacheConfig::new(POOL_SIZE, BUCKET_COUNT), device).unwrap())
}

// Every thread cycles over `working_set` blocks; a working set no larger
// than the pool is served by hits, a larger one forces recycling
fn run_workload(cache: &Arc<BufCache>, working_set: u32) {
    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|thread_id| {
            let cache = cache.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(thread_id as u64);
                for _ in 0..OPERATIONS_PER_THREAD {
                    let blockno = rng.gen_range(0..working_set);
                    let buf = cache.read_through(1, blockno).unwrap();
                    cache.release(buf);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

// Benchmark concurrent lookups that stay resident
pub fn bench_concurrent_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("ConcurrentHits");

    let cache = new_cache();
    run_workload(&cache, POOL_SIZE as u32 / 2);
    group.bench_function("BufCache", |b| {
        b.iter(|| run_workload(&cache, POOL_SIZE as u32 / 2))
    });

    group.finish();
}

// Benchmark concurrent lookups over a working set larger than the pool
pub fn bench_concurrent_misses(c: &mut Criterion) {
    let mut group = c.benchmark_group("ConcurrentMisses");

    let cache = new_cache();
    group.bench_function("BufCache", |b| {
        b.iter(|| run_workload(&cache, POOL_SIZE as u32 * 8))
    });

    group.finish();
}

// Benchmark a single thread re-reading one cached block
pub fn bench_single_hit(c: &mut Criterion) {
    let cache = new_cache();
    c.bench_function("SingleHit", |b| {
        b.iter(|| {
            let buf = cache.read_through(1, 0).unwrap();
            cache.release(buf);
        })
    });
}

criterion_group!(
    benches,
    bench_concurrent_hits,
    bench_concurrent_misses,
    bench_single_hit
);
criterion_main!(benches);
