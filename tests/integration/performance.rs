//! Performance tests for specflow.
//!
//! These tests verify that orchestration overhead stays small next to the
//! tasks it runs:
//! - Level computation for a few hundred tasks is fast
//! - Per-task scheduling overhead stays in the low milliseconds
//! - Routing and snapshotting are cheap enough to run on every task
//!
//! Use `cargo test --test integration performance -- --nocapture` to see metrics.

use std::sync::Arc;
use std::time::Instant;

use specflow::core::{FnTask, TaskResult};
use specflow::orchestration::{diff, snapshot, FlowStrategy, Scheduler, SectionRouter};

use crate::fixtures::{sample_spec, SAMPLE_DOC};

/// Performance thresholds
const MAX_LEVELS_MS: u128 = 50;
const MAX_PER_TASK_OVERHEAD_MS: u128 = 5;
const MAX_ROUTE_US: u128 = 2000;

fn noop(name: &str) -> Arc<dyn specflow::core::Task> {
    FnTask::new(name, |_| Ok(TaskResult::success("ok"))).into_arc()
}

/// Wide graph: `width` roots, each with one dependent.
fn wide_scheduler(width: usize, strategy: FlowStrategy) -> Scheduler {
    let mut scheduler = Scheduler::new(Arc::new(sample_spec("perf"))).with_strategy(strategy);
    for i in 0..width {
        let root = format!("root-{}", i);
        scheduler.register(noop(&root), &[], &[], 0).unwrap();
        scheduler
            .register(noop(&format!("leaf-{}", i)), &[root.as_str()], &[], 0)
            .unwrap();
    }
    scheduler
}

#[test]
fn test_execution_levels_scale() {
    let scheduler = wide_scheduler(250, FlowStrategy::Dag);

    let start = Instant::now();
    let levels = scheduler.execution_levels();
    let elapsed = start.elapsed();

    println!("execution_levels for 500 tasks: {:?}", elapsed);
    assert_eq!(levels.len(), 2);
    assert_eq!(levels[0].len(), 250);
    assert!(
        elapsed.as_millis() < MAX_LEVELS_MS,
        "level computation took {:?}",
        elapsed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_overhead_per_task() {
    for strategy in [FlowStrategy::Sequential, FlowStrategy::Dag] {
        let mut scheduler = wide_scheduler(100, strategy);

        let start = Instant::now();
        let results = scheduler.execute().await;
        let elapsed = start.elapsed();

        let per_task = elapsed.as_millis() / results.len() as u128;
        println!(
            "{} strategy: {} tasks in {:?} ({}ms/task)",
            strategy,
            results.len(),
            elapsed,
            per_task
        );
        assert!(results.values().all(|r| r.is_success()));
        assert!(
            per_task < MAX_PER_TASK_OVERHEAD_MS,
            "{} scheduling overhead {}ms per task",
            strategy,
            per_task
        );
    }
}

#[test]
fn test_route_is_cheap() {
    let router = SectionRouter::new();
    let spec = sample_spec("perf");
    let iterations = 1000;

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = router.route(&spec, "code_review_agent", true, Some(500));
    }
    let avg_us = start.elapsed().as_micros() / iterations;

    println!("route: {}us average", avg_us);
    assert!(avg_us < MAX_ROUTE_US, "route averaged {}us", avg_us);
}

#[test]
fn test_snapshot_and_diff_are_cheap() {
    let large: String = (1..=12)
        .map(|n| format!("## {}. Section {}\n{}\n\n", n, n, "body line\n".repeat(200)))
        .collect();

    let start = Instant::now();
    for _ in 0..100 {
        let a = snapshot("perf", &large);
        let b = snapshot("perf", SAMPLE_DOC);
        let _ = diff(&a, &b);
    }
    let elapsed = start.elapsed();

    println!("100 snapshot/diff rounds: {:?}", elapsed);
    assert!(elapsed.as_millis() < 1000);
}
