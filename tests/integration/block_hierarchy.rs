//! Hierarchical block traversal tests.
//!
//! These tests run one task list across the sample tree
//! (root, root/componentA, root/componentB, root/componentB/leafB1) and
//! check ordering, context propagation, the rule gate and same-as
//! resolution.

use serde_json::json;
use std::sync::{Arc, Mutex};

use specflow::core::{FnTask, TaskResult, TaskStatus};
use specflow::orchestration::{BlockPipeline, HierarchyStatus, ProcessingOrder};
use specflow::rules::{MergeMode, Rule, RuleEngine, RuleLevel, RuleSeverity, SameAsReference};
use specflow::spec::{Block, SectionId, Specification};
use specflow::Config;

use crate::fixtures::{recording_task, sample_tree, ExecutionLog};

fn pipeline_with(log: &ExecutionLog) -> BlockPipeline {
    let mut pipeline = BlockPipeline::new(sample_tree());
    pipeline.add_task(recording_task("coding_agent", log, &["code"]), &[], &["code"], 0);
    pipeline.add_task(
        recording_task("testing_agent", log, &["tests"]),
        &["coding_agent"],
        &["tests"],
        0,
    );
    pipeline
}

/// Test: Bottom-up visits leaves first
/// Given the sample tree
/// When processed bottom-up
/// Then leafB1 runs before componentB, which runs before root
#[tokio::test]
async fn test_bottom_up_ordering() {
    let log = ExecutionLog::new();
    let result = pipeline_with(&log).run(ProcessingOrder::BottomUp).await;

    assert_eq!(result.status, HierarchyStatus::Success);
    assert_eq!(result.processed_blocks, 4);
    let leaf = log.first_index_of_block("root/componentB/leafB1");
    let component = log.first_index_of_block("root/componentB");
    let root = log.first_index_of_block("root");
    assert!(leaf < component);
    assert!(component < root);

    // Tasks inside one block keep their dependency order.
    let leaf_tasks: Vec<String> = log
        .entries()
        .into_iter()
        .filter(|(block, _)| block == "root/componentB/leafB1")
        .map(|(_, task)| task)
        .collect();
    assert_eq!(leaf_tasks, vec!["coding_agent", "testing_agent"]);
}

/// Test: Top-down visits the root first
/// Given the sample tree
/// When processed top-down
/// Then root runs before componentB, which runs before leafB1
#[tokio::test]
async fn test_top_down_ordering() {
    let log = ExecutionLog::new();
    let result = pipeline_with(&log).run(ProcessingOrder::TopDown).await;

    assert!(result.is_success());
    let leaf = log.first_index_of_block("root/componentB/leafB1");
    let component = log.first_index_of_block("root/componentB");
    let root = log.first_index_of_block("root");
    assert!(root < component);
    assert!(component < leaf);
    assert_eq!(result.execution_order[0], "root");
}

/// Test: Exposed context carries block artifacts upward
/// Given the sample tree processed bottom-up
/// When root runs
/// Then its inbound context lists both components with their artifacts
#[tokio::test]
async fn test_bottom_up_context_aggregates_children() {
    let seen = Arc::new(Mutex::new(None));
    let seen_in_task = Arc::clone(&seen);
    let task = FnTask::new("architecture_agent", move |ctx| {
        if ctx.block.as_ref().map(|b| b.depth) == Some(0) {
            *seen_in_task.lock().unwrap() = Some(ctx.parent_context.clone());
        }
        let path = ctx.block.as_ref().map(|b| b.path.clone()).unwrap_or_default();
        Ok(TaskResult::success("ok").with_data("architecture_update", json!(path)))
    });
    let mut pipeline = BlockPipeline::new(sample_tree());
    pipeline.add_task(task.into_arc(), &[], &["architecture_update"], 0);

    let result = pipeline.run(ProcessingOrder::BottomUp).await;
    assert!(result.is_success());

    let inbound = seen.lock().unwrap().clone().unwrap();
    let children = inbound["children"].as_array().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0]["path"], "root/componentA");
    assert_eq!(children[1]["path"], "root/componentB");
    assert_eq!(
        children[1]["context"]["artifacts"]["architecture_update"],
        "root/componentB"
    );
    assert_eq!(children[1]["context"]["block_path"], "root/componentB");
}

/// Test: A scoped error rule gates the block and its descendants only
/// Given an error-severity scoped rule on componentB
/// When processed top-down
/// Then componentB and leafB1 are gated while root and componentA run
#[tokio::test]
async fn test_scoped_rule_gates_subtree() {
    let log = ExecutionLog::new();
    let mut pipeline = pipeline_with(&log);
    let component_b = pipeline.tree().find("root/componentB").unwrap();
    pipeline
        .tree_mut()
        .get_mut(component_b)
        .unwrap()
        .scoped_rules
        .push(
            Rule::new(
                "SEC-001",
                "encryption at rest",
                |_: &Block, spec: &Specification, section: Option<SectionId>| {
                    (section == Some(SectionId::Security) && !spec.security.encryption_at_rest)
                        .then(|| "encryption at rest is required".to_string())
                },
            )
            .with_level(RuleLevel::Scoped)
            .with_severity(RuleSeverity::Error)
            .with_sections(vec![SectionId::Security]),
        );

    let result = pipeline.run(ProcessingOrder::TopDown).await;

    assert_eq!(result.status, HierarchyStatus::Failed);
    assert_eq!(result.failed_blocks, 2);
    let mut gated = result.failed_block_paths();
    gated.sort();
    assert_eq!(gated, vec!["root/componentB", "root/componentB/leafB1"]);

    let leaf = result.block("root/componentB/leafB1").unwrap();
    assert!(leaf.gated);
    assert_eq!(leaf.violations[0].section, "security");
    assert!(leaf.context["errors"][0]
        .as_str()
        .unwrap()
        .starts_with("[ERROR] SEC-001 at root/componentB/leafB1:security"));

    let ran: Vec<String> = log.entries().into_iter().map(|(block, _)| block).collect();
    assert!(ran.iter().all(|block| block == "root" || block == "root/componentA"));
    assert!((result.success_rate() - 0.5).abs() < f64::EPSILON);
}

/// Test: Warnings are recorded but never gate
/// Given a global warning rule that always fires
/// When processed bottom-up
/// Then every block runs and reports the violation
#[tokio::test]
async fn test_warning_rules_do_not_gate() {
    let log = ExecutionLog::new();
    let mut pipeline = pipeline_with(&log).with_rules(RuleEngine::with_global_rules(vec![
        Rule::new(
            "STYLE-1",
            "docstrings",
            |_: &Block, _: &Specification, _: Option<SectionId>| {
                Some("missing docstrings".to_string())
            },
        ),
    ]));

    let result = pipeline.run(ProcessingOrder::BottomUp).await;

    assert!(result.is_success());
    assert_eq!(log.entries().len(), 8);
    for block in result.block_results.values() {
        assert_eq!(block.violations.len(), 1);
        assert_eq!(block.context["violations"][0]["rule_id"], "STYLE-1");
    }
}

/// Test: Dry run executes gated blocks
/// Given an always-failing error rule and a dry-run config
/// When processed
/// Then tasks see the dry-run flag and every block runs
#[tokio::test]
async fn test_dry_run_bypasses_gate() {
    let dry_flags = Arc::new(Mutex::new(Vec::new()));
    let flags = Arc::clone(&dry_flags);
    let task = FnTask::new("coding_agent", move |ctx| {
        flags.lock().unwrap().push(ctx.dry_run);
        Ok(TaskResult::success("planned"))
    });

    let mut pipeline = BlockPipeline::new(sample_tree())
        .with_rules(RuleEngine::with_global_rules(vec![Rule::new(
            "GATE",
            "always",
            |_: &Block, _: &Specification, _: Option<SectionId>| {
                Some("blocked".to_string())
            },
        )
        .with_severity(RuleSeverity::Error)]))
        .with_config(Config {
            dry_run: true,
            ..Config::default()
        });
    pipeline.add_task(task.into_arc(), &[], &[], 0);

    let result = pipeline.run(ProcessingOrder::TopDown).await;

    assert!(result.is_success());
    assert_eq!(*dry_flags.lock().unwrap(), vec![true; 4]);
    assert!(result.block_results.values().all(|b| !b.gated));
}

/// Test: Same-as references resolve against relatives
/// Given leafB1 borrowing componentB's security section
/// When processed
/// Then leafB1's task sees the borrowed values and the stored spec is untouched
#[tokio::test]
async fn test_same_as_resolution_feeds_tasks() {
    let mut tree = sample_tree();
    let component_b = tree.find("root/componentB").unwrap();
    tree.get_mut(component_b).unwrap().spec.security.roles = vec!["admin".to_string()];
    let leaf = tree.find("root/componentB/leafB1").unwrap();
    tree.get_mut(leaf).unwrap().same_as.push(
        SameAsReference::new(SectionId::Security, "../").with_mode(MergeMode::Replace),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_task = Arc::clone(&seen);
    let task = FnTask::new("security_agent", move |ctx| {
        if ctx.block.as_ref().map(|b| b.name.as_str()) == Some("leafB1") {
            *seen_in_task.lock().unwrap() = ctx.spec.security.roles.clone();
        }
        Ok(TaskResult::success("scanned"))
    });
    let mut pipeline = BlockPipeline::new(tree);
    pipeline.add_task(task.into_arc(), &[], &[], 0);

    let result = pipeline.run(ProcessingOrder::BottomUp).await;

    assert!(result.is_success());
    assert_eq!(*seen.lock().unwrap(), vec!["admin"]);
    let stored = pipeline.tree().block("root/componentB/leafB1").unwrap();
    assert!(stored.spec.security.roles.is_empty());
}

/// Test: A task failure stays local to its block
/// Given coding failing only in componentA
/// When processed bottom-up
/// Then only componentA fails, and root sees it as an unsuccessful child
#[tokio::test]
async fn test_block_failure_is_local() {
    let root_inbound = Arc::new(Mutex::new(None));
    let inbound = Arc::clone(&root_inbound);
    let task = FnTask::new("coding_agent", move |ctx| {
        let block = ctx.block.clone().unwrap_or_default();
        if block.depth == 0 {
            *inbound.lock().unwrap() = Some(ctx.parent_context.clone());
        }
        if block.name == "componentA" {
            return Ok(TaskResult::failure("generation failed"));
        }
        Ok(TaskResult::success("generated"))
    });
    let mut pipeline = BlockPipeline::new(sample_tree());
    pipeline.add_task(task.into_arc(), &[], &[], 0);

    let result = pipeline.run(ProcessingOrder::BottomUp).await;

    assert_eq!(result.failed_blocks, 1);
    assert_eq!(result.processed_blocks, 4);
    let a = result.block("root/componentA").unwrap();
    assert_eq!(a.task_results["coding_agent"].status, TaskStatus::Failed);
    assert!(result.block("root").unwrap().success);

    let inbound = root_inbound.lock().unwrap().clone().unwrap();
    assert_eq!(inbound["children"][0]["path"], "root/componentA");
    assert_eq!(inbound["children"][0]["success"], false);
    assert_eq!(inbound["children"][1]["success"], true);
    assert_eq!(result.summary()["success_rate"], json!(0.75));
}
