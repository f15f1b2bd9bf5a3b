use criterion::{Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;

// Import the lock primitives from the main crate
use bcache::infrastructure::lwlock::{LockInterface, SleepLock, SpinLock};

// Test configuration
const THREADS: usize = 8;
const OPERATIONS_PER_THREAD: usize = 10_000;

// Generic contention scenario: every thread bumps a shared counter in a
// short critical section, the way bucket bookkeeping does
fn bench_lock_scenario<L>(b: &mut criterion::Bencher)
where
    L: LockInterface<usize> + Send + Sync + 'static,
{
    b.iter(|| {
        let lock = Arc::new(L::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..OPERATIONS_PER_THREAD {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    });
}

// Benchmark short critical sections under contention
pub fn bench_short_sections(c: &mut Criterion) {
    let mut group = c.benchmark_group("ShortSections");

    group.bench_function("SpinLock", |b| bench_lock_scenario::<SpinLock<usize>>(b));
    group.bench_function("SleepLock", |b| bench_lock_scenario::<SleepLock<usize>>(b));

    group.finish();
}

// Benchmark uncontended acquire/release
pub fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("Uncontended");

    let spin = SpinLock::new(0usize, "bench");
    group.bench_function("SpinLock", |b| b.iter(|| *spin.lock() += 1));

    let sleep = SleepLock::new(0usize, "bench");
    group.bench_function("SleepLock", |b| b.iter(|| *sleep.lock() += 1));

    group.finish();
}

criterion_group!(benches, bench_short_sections, bench_uncontended);
criterion_main!(benches);
