use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use engine_core::config::EngineConfig;
use engine_core::job::{JobFn, JobPriority, JobSystem};
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

extern "C" fn bump(_data: *mut u8) {
    COUNTER.fetch_add(1, Ordering::Relaxed);
}

fn run_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("kick_jobs");
    for size in [64, 512, 4096] {
        let id = BenchmarkId::new("blocking_kick_job", size);

        group.bench_with_input(id, &size, |b, &size| {
            b.iter_batched(
                || {
                    let mut config = EngineConfig::default();
                    config.worker_count = Some(4);
                    JobSystem::new(&config).expect("job system should start")
                },
                |system| {
                    let jobs = (0..size).map(|_| (bump as JobFn, core::ptr::null_mut())).collect();
                    system.blocking_kick_job(JobPriority::High, jobs).expect("batch should complete");
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, run_bench);
criterion_main!(benches);
