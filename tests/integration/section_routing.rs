//! Section routing tests.
//!
//! These tests check the routed views tasks receive, both directly from
//! the router and through the scheduler.

use std::sync::{Arc, Mutex};

use specflow::core::{FnTask, TaskResult, TaskSections};
use specflow::orchestration::{Scheduler, SectionRouter};
use specflow::spec::SectionId;
use specflow::Config;

use crate::fixtures::sample_spec;

/// Test: Routing is idempotent
/// Given an unchanged spec
/// When the same task is routed twice
/// Then both views are identical
#[test]
fn test_route_twice_is_identical() {
    let router = SectionRouter::new();
    let spec = sample_spec("payments");
    for task in ["coding_agent", "security_agent", "unknown_task"] {
        assert_eq!(
            router.route(&spec, task, true, Some(100)),
            router.route(&spec, task, true, Some(100))
        );
    }
}

/// Test: Oversized required sections are summarized, never dropped
/// Given an overview far larger than the budget
/// When routed for the coding task
/// Then every required section is present and the overview is truncated
#[test]
fn test_required_sections_survive_budget() {
    let mut spec = sample_spec("payments");
    spec.overview.background = "Long design history. ".repeat(200);
    let router = SectionRouter::new();

    let routed = router.route(&spec, "coding_agent", true, Some(20));

    for required in router.required_sections("coding_agent") {
        assert!(routed.contains(required), "{} missing", required);
    }
    let overview = routed
        .sections
        .iter()
        .find(|s| s.id == SectionId::Overview)
        .unwrap();
    assert!(overview.summarized);
    assert!(overview
        .content
        .as_str()
        .unwrap()
        .contains("chars total)"));
}

/// Test: Scheduler honors configured budget and optional flag
/// Given a config excluding optional sections
/// When the security task runs
/// Then it receives only its required sections
#[tokio::test]
async fn test_scheduler_routes_by_config() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_task = Arc::clone(&seen);
    let task = FnTask::new("security_agent", move |ctx| {
        *seen_in_task.lock().unwrap() = ctx.sections.section_ids();
        Ok(TaskResult::success("scanned"))
    });

    let config = Config {
        include_optional_sections: false,
        ..Config::default()
    };
    let mut scheduler = Scheduler::new(Arc::new(sample_spec("payments"))).with_config(&config);
    scheduler.register(task.into_arc(), &[], &[], 0).unwrap();
    scheduler.execute().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![SectionId::Security, SectionId::ApiContract]
    );
}

/// Test: Runtime registration overrides routing
/// Given a custom task declaring its own sections
/// When it runs
/// Then the prompt context lists exactly those sections
#[tokio::test]
async fn test_custom_task_sections() {
    let prompt = Arc::new(Mutex::new(String::new()));
    let prompt_in_task = Arc::clone(&prompt);
    let task = FnTask::new("docs_agent", move |ctx| {
        *prompt_in_task.lock().unwrap() = ctx.sections.to_prompt_context();
        Ok(TaskResult::success("documented"))
    })
    .with_sections(TaskSections::new(
        vec![SectionId::Overview],
        vec![SectionId::Acceptance],
    ));

    let mut scheduler = Scheduler::new(Arc::new(sample_spec("payments")));
    scheduler.register(task.into_arc(), &[], &[], 0).unwrap();
    scheduler.execute().await;

    let prompt = prompt.lock().unwrap();
    assert!(prompt.starts_with("# Relevant Spec Sections for docs_agent"));
    assert!(prompt.contains("## Overview"));
    assert!(prompt.contains("## Acceptance"));
    assert!(!prompt.contains("## Security"));
    assert!(prompt.contains("payments service"));
}
