//! End-to-end workflow integration tests.
//!
//! These tests register small task graphs, execute them through the
//! scheduler or the runner, and check results, artifacts and the message
//! log together.

use serde_json::json;
use std::sync::Arc;

use specflow::core::{FnTask, TaskResult, TaskStatus};
use specflow::orchestration::{
    FailurePolicy, FlowStrategy, MessageKind, PipelineRunner, RunStatus, Scheduler, TaskRegistry,
};
use specflow::Error;

use crate::fixtures::{
    counting_task, failing_task, recording_task, sample_spec, CallCounter, ExecutionLog,
};

fn scheduler(strategy: FlowStrategy) -> Scheduler {
    Scheduler::new(Arc::new(sample_spec("payments"))).with_strategy(strategy)
}

/// Test: Build, test and scan succeed
/// Given "build" providing "artifact" and "test"/"scan" depending on it
/// When the scheduler executes
/// Then all three complete and the artifact is in the shared store
#[tokio::test]
async fn test_build_test_scan_happy_path() {
    for strategy in [FlowStrategy::Sequential, FlowStrategy::Dag] {
        let log = ExecutionLog::new();
        let mut scheduler = scheduler(strategy);
        scheduler
            .register(recording_task("build", &log, &["artifact"]), &[], &["artifact"], 0)
            .unwrap();
        scheduler
            .register(recording_task("test", &log, &[]), &["build"], &[], 0)
            .unwrap();
        scheduler
            .register(recording_task("scan", &log, &[]), &["build"], &[], 0)
            .unwrap();

        let results = scheduler.execute().await;

        assert!(results.values().all(|r| r.status == TaskStatus::Success));
        let state = scheduler.state();
        assert_eq!(state.completed.len(), 3, "strategy {}", strategy);
        assert_eq!(state.artifact("artifact"), Some(&json!("build output")));
        assert_eq!(log.tasks()[0], "build");
        assert_eq!(state.messages.len(), 3);
        assert!(state
            .messages
            .iter()
            .all(|m| m.kind == MessageKind::Result && m.to == "orchestrator"));
    }
}

/// Test: A failed build never invokes its dependents
/// Given "build" failing
/// When the scheduler executes
/// Then "test" and "scan" end failed with zero invocations
#[tokio::test]
async fn test_failed_build_blocks_dependents() {
    for strategy in [FlowStrategy::Sequential, FlowStrategy::Dag] {
        for policy in [FailurePolicy::StopOnFirstFailure, FailurePolicy::Continue] {
            let calls = CallCounter::new();
            let mut scheduler = scheduler(strategy).with_failure_policy(policy);
            scheduler
                .register(failing_task("build", "compile error"), &[], &["artifact"], 0)
                .unwrap();
            scheduler
                .register(counting_task("test", &calls), &["build"], &[], 0)
                .unwrap();
            scheduler
                .register(counting_task("scan", &calls), &["build"], &[], 0)
                .unwrap();

            let results = scheduler.execute().await;

            assert_eq!(calls.count(), 0, "{} / {}", strategy, policy);
            assert_eq!(results["test"].status, TaskStatus::Failed);
            assert_eq!(results["scan"].status, TaskStatus::Failed);
            assert!(scheduler.state().artifact("artifact").is_none());
            assert!(scheduler.state().pending.is_empty());
        }
    }
}

/// Test: Failure propagates transitively
/// Given a chain a -> b -> c -> d where b fails
/// When the scheduler executes with the continue policy
/// Then c and d fail without running and a stays completed
#[tokio::test]
async fn test_transitive_dependents_fail() {
    let calls = CallCounter::new();
    let mut scheduler = scheduler(FlowStrategy::Sequential)
        .with_failure_policy(FailurePolicy::Continue);
    scheduler.register(counting_task("a", &calls), &[], &[], 0).unwrap();
    scheduler.register(failing_task("b", "boom"), &["a"], &[], 0).unwrap();
    scheduler.register(counting_task("c", &calls), &["b"], &[], 0).unwrap();
    scheduler.register(counting_task("d", &calls), &["c"], &[], 0).unwrap();

    let results = scheduler.execute().await;

    assert_eq!(calls.count(), 1);
    assert_eq!(results["a"].status, TaskStatus::Success);
    for name in ["b", "c", "d"] {
        assert_eq!(results[name].status, TaskStatus::Failed, "{}", name);
    }
    let errors: Vec<_> = scheduler
        .state()
        .messages
        .iter()
        .filter(|m| m.kind == MessageKind::Error)
        .map(|m| m.to.clone())
        .collect();
    assert_eq!(errors, vec!["c", "d"]);
}

/// Test: Standard flow through the registry and runner
/// Given the standard registry with coding, testing, security and review tasks
/// When the runner executes
/// Then review sees code and tests artifacts and the run succeeds
#[tokio::test]
async fn test_standard_flow_with_runner() {
    let log = ExecutionLog::new();
    let review = FnTask::new("code_review_agent", |ctx| {
        let code = ctx.artifact("code").cloned().unwrap_or_default();
        let tests = ctx.artifact("tests").cloned().unwrap_or_default();
        if code.is_null() || tests.is_null() {
            return Ok(TaskResult::failure("missing inputs"));
        }
        Ok(TaskResult::success("approved").with_data("review", json!({"code": code, "tests": tests})))
    });

    let tasks = vec![
        recording_task("coding_agent", &log, &["code", "files_created"]),
        recording_task("testing_agent", &log, &["tests"]),
        recording_task("security_agent", &log, &["security_report"]),
        review.into_arc(),
    ];
    let scheduler = TaskRegistry::standard()
        .build_scheduler(Arc::new(sample_spec("payments")), tasks)
        .unwrap();

    let mut runner = PipelineRunner::new(scheduler);
    let result = runner.run().await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(
        result.artifact("review"),
        Some(&json!({"code": "coding_agent output", "tests": "testing_agent output"}))
    );
    assert_eq!(result.artifact("security_report"), Some(&json!("security_agent output")));
    assert_eq!(log.tasks()[0], "coding_agent");
    assert_eq!(result.task_progress.len(), 4);
    assert!(result.ensure_success().is_ok());
}

/// Test: Partial run reports failing task names
/// Given a linter that fails after the coding task it depends on succeeds
/// When the runner executes with the continue policy
/// Then the run is partial and names the linter
#[tokio::test]
async fn test_partial_run_reports_failures() {
    let log = ExecutionLog::new();
    let tasks = vec![
        recording_task("coding_agent", &log, &["code"]),
        failing_task("linter_agent", "style violations"),
    ];
    let scheduler = TaskRegistry::standard()
        .build_scheduler(Arc::new(sample_spec("payments")), tasks)
        .unwrap()
        .with_failure_policy(FailurePolicy::Continue);

    let result = PipelineRunner::new(scheduler).run().await;

    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.failed_tasks(), vec!["linter_agent"]);
    assert_eq!(
        result.task_progress["linter_agent"].error.as_deref(),
        Some("style violations")
    );
    match result.ensure_success() {
        Err(Error::TaskFailed(names)) => assert_eq!(names, "linter_agent"),
        other => panic!("unexpected {:?}", other),
    }
    let summary = result.summary();
    assert!(summary.contains("PARTIAL"));
    assert!(summary.contains("Failed: linter_agent"));
}

/// Test: Unknown dependency fails only its dependent
/// Given a task depending on an unregistered name
/// When the scheduler executes with the continue policy
/// Then that task fails and the others complete
#[tokio::test]
async fn test_missing_dependency_is_contained() {
    let calls = CallCounter::new();
    let mut scheduler =
        scheduler(FlowStrategy::Dag).with_failure_policy(FailurePolicy::Continue);
    scheduler.register(counting_task("ok", &calls), &[], &[], 0).unwrap();
    scheduler
        .register(counting_task("orphan", &calls), &["ghost"], &[], 0)
        .unwrap();

    let results = scheduler.execute().await;

    assert_eq!(calls.count(), 1);
    assert_eq!(results["ok"].status, TaskStatus::Success);
    assert_eq!(results["orphan"].status, TaskStatus::Failed);
    assert_eq!(results["orphan"].errors, vec!["dependency ghost not completed"]);
}
