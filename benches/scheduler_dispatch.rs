//! Benchmarks for the scheduler's tick/dispatch loop: per-tick overhead as
//! the task table grows, and the throughput effect of `max_concurrent`.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use regulens_core::domain::ScheduledTaskKind;
use regulens_core::error::CoreResult;
use regulens_core::scheduler::{Scheduler, TaskHandler};
use std::sync::Arc;
use std::time::Duration;

struct InstantHandler;

#[async_trait]
impl TaskHandler for InstantHandler {
    async fn run(&self, _payload: &serde_json::Value) -> CoreResult<serde_json::Value> {
        Ok(serde_json::json!({"ok": true}))
    }
}

fn build_scheduler(max_concurrent: usize, task_count: usize) -> Scheduler {
    let scheduler = Scheduler::new(max_concurrent);
    scheduler.register_handler(ScheduledTaskKind::Custom, Arc::new(InstantHandler));
    for i in 0..task_count {
        let task = regulens_core::domain::ScheduledTask::new(
            format!("bench-task-{i}"),
            ScheduledTaskKind::Custom,
            Duration::from_secs(60),
            3,
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        scheduler.add_task(task);
    }
    scheduler
}

fn bench_tick_by_table_size(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("scheduler_tick_by_table_size");

    for task_count in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(task_count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(task_count), &task_count, |b, &task_count| {
            b.to_async(&runtime).iter(|| async move {
                let scheduler = build_scheduler(task_count, task_count);
                black_box(scheduler.tick().await);
            });
        });
    }

    group.finish();
}

fn bench_tick_by_concurrency_cap(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("scheduler_tick_by_concurrency_cap");

    for max_concurrent in [1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(max_concurrent), &max_concurrent, |b, &max_concurrent| {
            b.to_async(&runtime).iter(|| async move {
                let scheduler = build_scheduler(max_concurrent, 100);
                black_box(scheduler.tick().await);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tick_by_table_size, bench_tick_by_concurrency_cap);
criterion_main!(benches);
