//! Task data model.
//!
//! A task is an opaque unit of work: the orchestrator only knows its name,
//! what it depends on and what it produces. Bodies are synchronous and run
//! on the blocking pool, so they may call out to slow collaborators.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::orchestration::router::RoutedSpec;
use crate::spec::{SectionId, Specification};

/// Task status in its lifecycle.
///
/// `Success`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "skipped" => Ok(TaskStatus::Skipped),
            other => Err(crate::error::Error::Validation(format!(
                "Unknown task status: {}",
                other
            ))),
        }
    }
}

/// Outcome of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub message: String,
    /// Structured output. Keys a task declares in `provides` are copied
    /// from here into the shared artifact store.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub files_created: Vec<PathBuf>,
    #[serde(default)]
    pub files_modified: Vec<PathBuf>,
}

impl TaskResult {
    pub fn new(status: TaskStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::Success, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::Failed, message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::Skipped, message)
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn with_files_created(mut self, files: Vec<PathBuf>) -> Self {
        self.files_created = files;
        self
    }

    pub fn with_files_modified(mut self, files: Vec<PathBuf>) -> Self {
        self.files_modified = files;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// Specification sections a task reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskSections {
    pub required: Vec<SectionId>,
    #[serde(default)]
    pub optional: Vec<SectionId>,
}

impl TaskSections {
    pub fn new(required: Vec<SectionId>, optional: Vec<SectionId>) -> Self {
        Self { required, optional }
    }
}

/// Position of the block a task is running for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockInfo {
    pub path: String,
    pub name: String,
    pub depth: usize,
}

/// Everything a task body gets to see.
///
/// The context is an owned snapshot taken just before the task starts;
/// nothing a body does to it is visible to other tasks.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_name: String,
    pub spec: Arc<Specification>,
    /// Sections routed to this task under the configured budget.
    pub sections: RoutedSpec,
    /// Artifact values published by tasks that finished earlier.
    pub artifacts: HashMap<String, Value>,
    /// Last known outcome of finished tasks, recovered from the message log.
    pub previous_results: HashMap<String, TaskResult>,
    pub block: Option<BlockInfo>,
    /// Parent context (top-down) or aggregated child contexts (bottom-up).
    pub parent_context: Value,
    pub rule_ids: Vec<String>,
    pub project_root: PathBuf,
    pub dry_run: bool,
}

impl TaskContext {
    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    pub fn previous(&self, task: &str) -> Option<&TaskResult> {
        self.previous_results.get(task)
    }
}

/// A unit of work the orchestrator can run.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, ctx: &TaskContext) -> Result<TaskResult>;

    /// Sections this task reads. `None` defers to the router's table.
    fn sections(&self) -> Option<TaskSections> {
        None
    }
}

type TaskBody = dyn Fn(&TaskContext) -> Result<TaskResult> + Send + Sync;

/// Adapter turning a closure into a [`Task`].
pub struct FnTask {
    name: String,
    sections: Option<TaskSections>,
    body: Box<TaskBody>,
}

impl FnTask {
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&TaskContext) -> Result<TaskResult> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            sections: None,
            body: Box::new(body),
        }
    }

    pub fn with_sections(mut self, sections: TaskSections) -> Self {
        self.sections = Some(sections);
        self
    }

    pub fn into_arc(self) -> Arc<dyn Task> {
        Arc::new(self)
    }
}

impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &TaskContext) -> Result<TaskResult> {
        (self.body)(ctx)
    }

    fn sections(&self) -> Option<TaskSections> {
        self.sections.clone()
    }
}

impl std::fmt::Debug for FnTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask")
            .field("name", &self.name)
            .field("sections", &self.sections)
            .finish()
    }
}
