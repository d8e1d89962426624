//! Per-run registry of task dependency declarations.
//!
//! A [`TaskRegistry`] is constructed explicitly for each run and consulted
//! when tasks are handed to a [`Scheduler`]. It carries only declarations;
//! task bodies are supplied by the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::task::Task;
use crate::error::{Error, Result};
use crate::orchestration::scheduler::{FlowStrategy, Scheduler, TaskRegistration};
use crate::sflog_debug;
use crate::spec::Specification;

/// Dependency and artifact declarations for one task name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryEntry {
    pub depends_on: Vec<String>,
    pub provides: Vec<String>,
    pub priority: i32,
}

impl RegistryEntry {
    pub fn new(depends_on: &[&str], provides: &[&str]) -> Self {
        Self {
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Task name to [`RegistryEntry`] lookup.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl TaskRegistry {
    /// An empty registry. Every task built from it has no dependencies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the standard generation flow.
    pub fn standard() -> Self {
        let table: [(&str, &[&str], &[&str]); 7] = [
            ("coding_agent", &[], &["code", "files_created"]),
            ("testing_agent", &["coding_agent"], &["tests", "test_files"]),
            (
                "test_generator_agent",
                &["coding_agent"],
                &["tests", "test_files"],
            ),
            ("security_agent", &["coding_agent"], &["security_report"]),
            (
                "code_review_agent",
                &["coding_agent", "testing_agent"],
                &["review"],
            ),
            ("linter_agent", &["coding_agent"], &["linted_code"]),
            (
                "architecture_agent",
                &["coding_agent"],
                &["architecture_update"],
            ),
        ];

        let mut registry = Self::new();
        for (name, depends_on, provides) in table {
            registry.register(name, RegistryEntry::new(depends_on, provides));
        }
        registry
    }

    /// Prioritized four-task flow: coding, then security scanning and test
    /// generation, then a review that waits on the generated tests.
    pub fn full_flow() -> Self {
        let table: [(&str, &[&str], &[&str], i32); 4] = [
            ("coding_agent", &[], &["code", "files_created"], 100),
            ("security_agent", &["coding_agent"], &["security_report"], 80),
            (
                "test_generator_agent",
                &["coding_agent"],
                &["tests", "test_files"],
                80,
            ),
            (
                "code_review_agent",
                &["coding_agent", "test_generator_agent"],
                &["review"],
                50,
            ),
        ];

        let mut registry = Self::new();
        for (name, depends_on, provides, priority) in table {
            registry.register(
                name,
                RegistryEntry::new(depends_on, provides).with_priority(priority),
            );
        }
        registry
    }

    /// Add or replace the entry for `name`.
    pub fn register(&mut self, name: &str, entry: RegistryEntry) -> Option<RegistryEntry> {
        self.entries.insert(name.to_string(), entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<RegistryEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Result<&RegistryEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::TaskNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declarations for `task`, or an empty registration for unknown names.
    pub fn registration(&self, task: Arc<dyn Task>) -> TaskRegistration {
        let registration = TaskRegistration::new(Arc::clone(&task));
        match self.entries.get(task.name()) {
            Some(entry) => registration
                .depends_on(entry.depends_on.iter().cloned())
                .provides(entry.provides.iter().cloned())
                .priority(entry.priority),
            None => {
                sflog_debug!("registry: {} has no entry, registering standalone", task.name());
                registration
            }
        }
    }

    /// Build a DAG-strategy scheduler for `tasks`.
    ///
    /// Fails when two tasks share a name or declare the same artifact key,
    /// e.g. `testing_agent` together with `test_generator_agent`.
    pub fn build_scheduler(
        &self,
        spec: Arc<Specification>,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new(spec).with_strategy(FlowStrategy::Dag);
        for task in tasks {
            scheduler.register_with(self.registration(task))?;
        }
        Ok(scheduler)
    }
}
