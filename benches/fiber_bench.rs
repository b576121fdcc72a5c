//! Benchmark for the fiber interpreter.
//!
//! Measures sequencing, error handling, forking and racing, on the manual
//! scheduler (interpreter cost only) and on the tokio scheduler.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use strand::effect::{Data, IO, UIO};
use strand::exit::Exit;
use strand::runtime::{Platform, Runtime};
use strand::scheduler::ManualScheduler;

struct Manual {
    scheduler: Arc<ManualScheduler>,
    runtime: Runtime,
}

impl Manual {
    fn new() -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let runtime = Runtime::new(
            Platform::builder()
                .scheduler(scheduler.clone())
                .report_unhandled(false)
                .build(),
        );
        Self { scheduler, runtime }
    }

    fn run<E: Data, A: Data>(&self, effect: IO<E, A>) -> Option<Exit<E, A>> {
        let fiber = self.runtime.fork(effect);
        self.scheduler.run_until_idle();
        fiber.poll_now()
    }
}

// =============================================================================
// Sequencing
// =============================================================================

fn benchmark_sequencing(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fiber_sequencing");
    let manual = Manual::new();

    for length in [10_u64, 1_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("flat_map_chain", length), &length, |bencher, &length| {
            bencher.iter(|| {
                let program = (0..length).fold(UIO::succeed(0_u64), |acc, _| {
                    acc.flat_map(|n| UIO::succeed(n + 1))
                });
                black_box(manual.run(program))
            });
        });
    }

    group.bench_function("foreach_1000", |bencher| {
        bencher.iter(|| black_box(manual.run(UIO::foreach(0..1_000_u64, UIO::succeed))));
    });

    group.finish();
}

// =============================================================================
// Error Handling
// =============================================================================

fn benchmark_error_handling(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fiber_error_handling");
    let manual = Manual::new();

    group.bench_function("catch_all", |bencher| {
        bencher.iter(|| {
            let program = IO::<&str, u32>::fail("e").catch_all(|_| IO::<(), u32>::succeed(1));
            black_box(manual.run(program))
        });
    });

    group.bench_function("bracket", |bencher| {
        bencher.iter(|| {
            let program = IO::<&str, u32>::bracket(
                IO::succeed(1_u32),
                |resource| IO::succeed(resource + 1),
                |_| UIO::unit(),
            );
            black_box(manual.run(program))
        });
    });

    group.finish();
}

// =============================================================================
// Concurrency
// =============================================================================

fn benchmark_concurrency(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fiber_concurrency");
    let manual = Manual::new();

    group.bench_function("fork_join", |bencher| {
        bencher.iter(|| {
            let program = UIO::succeed(1_u32).fork().flat_map(|fiber| fiber.join());
            black_box(manual.run(program))
        });
    });

    group.bench_function("race", |bencher| {
        bencher.iter(|| black_box(manual.run(UIO::succeed(1_u32).race(UIO::succeed(2)))));
    });

    group.bench_function("foreach_par_100", |bencher| {
        bencher.iter(|| black_box(manual.run(UIO::foreach_par(0..100_u32, UIO::succeed))));
    });

    let tokio = Runtime::default();
    group.bench_function("tokio_foreach_par_100", |bencher| {
        bencher.iter(|| black_box(tokio.run_blocking(UIO::foreach_par(0..100_u32, UIO::succeed))));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequencing,
    benchmark_error_handling,
    benchmark_concurrency
);
criterion_main!(benches);
