use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;

use drip_limit::DualLimiter;
use drip_limit::TokenBucket;

// Common shape for everything measured here: one non-blocking attempt.
trait TryTake: Send + Sync {
    fn try_take(&self) -> bool;
}

impl TryTake for TokenBucket {
    fn try_take(&self) -> bool {
        self.try_acquire()
    }
}

impl TryTake for DualLimiter {
    fn try_take(&self) -> bool {
        self.try_admit(4).is_ok()
    }
}

// Wrapper to bridge Governor into the same comparison
struct GovernorLimiter(RateLimiter<NotKeyed, InMemoryState, QuantaClock>);

impl TryTake for GovernorLimiter {
    fn try_take(&self) -> bool {
        self.0.check().is_ok()
    }
}

fn bench_single<T: TryTake>(group_name: &str, c: &mut Criterion, limiter: Arc<T>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(limiter.as_ref()).try_take();
        })
    });

    group.finish();
}

fn bench_parallel<T: TryTake + 'static>(group_name: &str, c: &mut Criterion, limiter: Arc<T>) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let l = Arc::clone(&limiter);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait(); // Wait for the start signal
                            for _ in 0..iters_per_thread {
                                let _ = black_box(l.try_take());
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let limit = 1_000_000;
    let interval = Duration::from_millis(1);

    // Refill tasks need somewhere to run while the benches drive the
    // buckets from plain threads.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .expect("bench runtime");

    let tb = Arc::new(TokenBucket::with_handle(limit, interval, rt.handle()));
    let dual = Arc::new(DualLimiter::new(
        TokenBucket::with_handle(limit, interval, rt.handle()),
        TokenBucket::with_handle(limit, interval, rt.handle()),
    ));
    let gov = Arc::new(GovernorLimiter(RateLimiter::direct_with_clock(
        Quota::per_minute(NonZeroU32::new(limit as u32).unwrap()),
        QuantaClock::default(),
    )));

    bench_single("TokenBucket", c, Arc::clone(&tb));
    bench_parallel("TokenBucket", c, tb);

    bench_single("DualLimiter", c, Arc::clone(&dual));
    bench_parallel("DualLimiter", c, dual);

    bench_single("Governor", c, Arc::clone(&gov));
    bench_parallel("Governor", c, gov);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
