//! Parallel execution correctness tests.
//!
//! These tests verify that the DAG strategy runs same-level tasks
//! concurrently while keeping level ordering and artifact visibility
//! intact.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use specflow::core::{FnTask, TaskResult, TaskStatus};
use specflow::orchestration::{FlowStrategy, Scheduler, SchedulerEvent};

use crate::fixtures::{recording_task, sample_spec, sleeping_task, ExecutionLog};

fn scheduler(strategy: FlowStrategy) -> Scheduler {
    Scheduler::new(Arc::new(sample_spec("payments"))).with_strategy(strategy)
}

/// Test: Same-level tasks overlap under the DAG strategy
/// Given three independent tasks sleeping 150ms each
/// When executed with the DAG strategy
/// Then the run takes well under the sequential sum
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dag_level_runs_concurrently() {
    let mut scheduler = scheduler(FlowStrategy::Dag);
    for name in ["a", "b", "c"] {
        scheduler
            .register(sleeping_task(name, Duration::from_millis(150)), &[], &[], 0)
            .unwrap();
    }

    let start = Instant::now();
    let results = scheduler.execute().await;
    let elapsed = start.elapsed();

    assert!(results.values().all(|r| r.status == TaskStatus::Success));
    assert!(
        elapsed < Duration::from_millis(400),
        "DAG level took {:?}, expected concurrent execution",
        elapsed
    );
}

/// Test: Sequential strategy runs one task at a time
/// Given two independent tasks sleeping 100ms each
/// When executed with the sequential strategy
/// Then the run takes at least the sum of both
#[tokio::test]
async fn test_sequential_level_is_serial() {
    let mut scheduler = scheduler(FlowStrategy::Sequential);
    for name in ["a", "b"] {
        scheduler
            .register(sleeping_task(name, Duration::from_millis(100)), &[], &[], 0)
            .unwrap();
    }

    let start = Instant::now();
    scheduler.execute().await;
    assert!(start.elapsed() >= Duration::from_millis(200));
}

/// Test: Dependents wait for the whole previous level
/// Given a diamond: root -> (left, right) -> join
/// When executed with the DAG strategy
/// Then join starts after both branches and sees both artifacts
#[tokio::test]
async fn test_diamond_ordering_and_artifacts() {
    let log = ExecutionLog::new();
    let seen = Arc::new(Mutex::new(None));

    let mut scheduler = scheduler(FlowStrategy::Dag);
    scheduler
        .register(recording_task("root", &log, &["base"]), &[], &["base"], 0)
        .unwrap();
    scheduler
        .register(recording_task("left", &log, &["left_out"]), &["root"], &["left_out"], 0)
        .unwrap();
    scheduler
        .register(recording_task("right", &log, &["right_out"]), &["root"], &["right_out"], 0)
        .unwrap();

    let seen_in_task = Arc::clone(&seen);
    let join = FnTask::new("join", move |ctx| {
        *seen_in_task.lock().unwrap() = Some((
            ctx.artifact("left_out").cloned(),
            ctx.artifact("right_out").cloned(),
        ));
        Ok(TaskResult::success("joined"))
    });
    scheduler
        .register(join.into_arc(), &["left", "right"], &[], 0)
        .unwrap();

    let levels = scheduler.execution_levels();
    assert_eq!(levels.len(), 3);
    assert_eq!(levels[2], vec!["join"]);

    scheduler.execute().await;

    let order = log.tasks();
    assert_eq!(order[0], "root");
    let (left, right) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(left, Some(json!("left output")));
    assert_eq!(right, Some(json!("right output")));
    assert_eq!(scheduler.state().execution_order.last().unwrap(), "join");
}

/// Test: Same-level peers cannot see each other's artifacts
/// Given two independent tasks where one publishes "data"
/// When executed with the DAG strategy
/// Then the other task's context has no "data" artifact
#[tokio::test]
async fn test_peer_artifacts_not_visible_within_level() {
    let log = ExecutionLog::new();
    let peer_saw = Arc::new(Mutex::new(Some(json!("unset"))));

    let mut scheduler = scheduler(FlowStrategy::Dag);
    scheduler
        .register(recording_task("producer", &log, &["data"]), &[], &["data"], 5)
        .unwrap();
    let peer_saw_in_task = Arc::clone(&peer_saw);
    let peer = FnTask::new("peer", move |ctx| {
        *peer_saw_in_task.lock().unwrap() = ctx.artifact("data").cloned();
        Ok(TaskResult::success("ok"))
    });
    scheduler.register(peer.into_arc(), &[], &[], 0).unwrap();

    scheduler.execute().await;

    assert_eq!(*peer_saw.lock().unwrap(), None);
    assert_eq!(scheduler.state().artifact("data"), Some(&json!("producer output")));
}

/// Test: Events bracket every task
/// Given a two-level DAG
/// When executed with a subscriber attached
/// Then each task has PreTask before PostTask and Complete comes last
#[tokio::test]
async fn test_event_stream_brackets_tasks() {
    let log = ExecutionLog::new();
    let mut scheduler = scheduler(FlowStrategy::Dag);
    scheduler.register(recording_task("a", &log, &[]), &[], &[], 0).unwrap();
    scheduler.register(recording_task("b", &log, &[]), &[], &[], 0).unwrap();
    scheduler.register(recording_task("c", &log, &[]), &["a", "b"], &[], 0).unwrap();
    let mut rx = scheduler.subscribe();

    scheduler.execute().await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    for task in ["a", "b", "c"] {
        let pre = events
            .iter()
            .position(|e| matches!(e, SchedulerEvent::PreTask { task: t } if t == task))
            .unwrap();
        let post = events
            .iter()
            .position(|e| matches!(e, SchedulerEvent::PostTask { task: t, .. } if t == task))
            .unwrap();
        assert!(pre < post, "{}", task);
    }
    let c_pre = events
        .iter()
        .position(|e| matches!(e, SchedulerEvent::PreTask { task } if task == "c"))
        .unwrap();
    let a_post = events
        .iter()
        .position(|e| matches!(e, SchedulerEvent::PostTask { task, .. } if task == "a"))
        .unwrap();
    assert!(a_post < c_pre);
    assert!(matches!(
        events.last(),
        Some(SchedulerEvent::Complete { completed, cancelled: false, .. }) if completed.len() == 3
    ));
}
