//! Worker pool throughput: CPU-bound jobs submitted through the non-blocking path.

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use runbook_agent::worker_pool::{Job, PoolSettings, WorkerPool};

struct HashJob {
    id: String,
    sink: Arc<AtomicU64>,
}

#[async_trait]
impl Job for HashJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self) -> runbook_agent::Result<()> {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.id.bytes().cycle().take(4_096) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        self.sink.fetch_add(black_box(hash) & 1, Ordering::Relaxed);
        Ok(())
    }
}

async fn run_jobs(workers: usize, jobs: usize) {
    let pool = WorkerPool::with_settings(PoolSettings {
        min_workers: workers,
        max_workers: workers,
        queue_capacity: 64,
        keep_alive: Duration::from_secs(6),
        monitoring_period: Duration::from_secs(15),
    });
    if pool.start().await.is_err() {
        return;
    }

    let sink = Arc::new(AtomicU64::new(0));
    for i in 0..jobs {
        let job = Arc::new(HashJob {
            id: format!("job-{i}"),
            sink: sink.clone(),
        });
        while !matches!(pool.submit(job.clone()), Ok(true)) {
            tokio::task::yield_now().await;
        }
    }
    let _ = pool.stop().await;
}

fn bench_worker_pool(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("worker_pool");

    for jobs in [500usize, 1_000] {
        group.throughput(Throughput::Elements(jobs as u64));
        for workers in [1usize, 4, 12] {
            group.bench_with_input(
                BenchmarkId::new(format!("{jobs}_jobs"), workers),
                &workers,
                |b, &workers| b.to_async(&runtime).iter(|| run_jobs(workers, jobs)),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_worker_pool);
criterion_main!(benches);
