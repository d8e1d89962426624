//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Tasks that count invocations, record the order they ran in, or fail
//! - A sample block tree (root, componentA, componentB, leafB1)
//! - A sample specification document with numbered sections

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use specflow::core::{FnTask, Task, TaskContext, TaskResult};
use specflow::spec::{BlockTree, Specification};

/// Shared log of `(block path or "-", task name)` pairs in execution order.
#[derive(Clone, Default)]
pub struct ExecutionLog(Arc<Mutex<Vec<(String, String)>>>);

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ctx: &TaskContext) {
        let block = ctx
            .block
            .as_ref()
            .map(|b| b.path.clone())
            .unwrap_or_else(|| "-".to_string());
        self.0.lock().unwrap().push((block, ctx.task_name.clone()));
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, task)| task).collect()
    }

    /// Index of the first entry for `block`.
    pub fn first_index_of_block(&self, block: &str) -> usize {
        self.entries()
            .iter()
            .position(|(path, _)| path == block)
            .unwrap_or_else(|| panic!("block {} never ran", block))
    }
}

/// Invocation counter shared with a task.
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Task that records itself and succeeds, publishing `"<name> output"`
/// under every key in `data_keys`.
pub fn recording_task(name: &str, log: &ExecutionLog, data_keys: &[&str]) -> Arc<dyn Task> {
    let log = log.clone();
    let keys: Vec<String> = data_keys.iter().map(|k| k.to_string()).collect();
    let owner = name.to_string();
    FnTask::new(name, move |ctx| {
        log.record(ctx);
        let mut result = TaskResult::success(format!("{} done", owner));
        for key in &keys {
            result = result.with_data(key, json!(format!("{} output", owner)));
        }
        Ok(result)
    })
    .into_arc()
}

/// Task that counts calls and succeeds.
pub fn counting_task(name: &str, counter: &CallCounter) -> Arc<dyn Task> {
    let counter = counter.clone();
    FnTask::new(name, move |_| {
        counter.0.fetch_add(1, Ordering::SeqCst);
        Ok(TaskResult::success("counted"))
    })
    .into_arc()
}

/// Task that always returns a failed result.
pub fn failing_task(name: &str, message: &str) -> Arc<dyn Task> {
    let message = message.to_string();
    FnTask::new(name, move |_| {
        Ok(TaskResult::failure(message.clone()).with_error(message.clone()))
    })
    .into_arc()
}

/// Task that sleeps before succeeding.
pub fn sleeping_task(name: &str, delay: Duration) -> Arc<dyn Task> {
    FnTask::new(name, move |_| {
        std::thread::sleep(delay);
        Ok(TaskResult::success("slept"))
    })
    .into_arc()
}

pub fn sample_spec(name: &str) -> Specification {
    let mut spec = Specification::new(name);
    spec.overview.summary = format!("{} service", name);
    spec.security.requires_auth = true;
    spec
}

/// root, root/componentA, root/componentB, root/componentB/leafB1
pub fn sample_tree() -> BlockTree {
    BlockTree::from_specs(
        [
            "root",
            "root/componentA",
            "root/componentB",
            "root/componentB/leafB1",
        ]
        .into_iter()
        .map(|path| {
            let name = path.rsplit('/').next().unwrap_or(path);
            (path.to_string(), sample_spec(name))
        })
        .collect(),
    )
    .expect("sample tree is valid")
}

pub const SAMPLE_DOC: &str = "\
# Payments Service

Preamble that is not part of any section.

## 1. Metadata
name: payments
version: 1.0.0

## 2. Overview
Handles card payments for the storefront.

## 3. Inputs
- amount: integer, cents
- currency: ISO 4217 code

## 6. API Contract
POST /payments returns 201 with a payment id.

## 7. Test Cases
- charge succeeds with a valid card
";
