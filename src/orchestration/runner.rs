//! Progress-reporting wrapper around a [`Scheduler`].
//!
//! [`PipelineRunner`] translates scheduler events into caller callbacks,
//! tracks per-task timing, and always hands back one [`RunResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::core::task::{TaskResult, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::hooks::SchedulerEvent;
use crate::orchestration::scheduler::Scheduler;
use crate::orchestration::state::RunState;
use crate::util::panic_message;
use crate::{sflog, sflog_error, sflog_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Some tasks succeeded and some failed.
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Timing and last message of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub message: String,
    pub error: Option<String>,
}

impl TaskProgress {
    fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
            message: String::new(),
            error: None,
        }
    }
}

/// Consolidated result of one [`PipelineRunner::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub id: RunId,
    pub spec_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub task_results: BTreeMap<String, TaskResult>,
    pub task_progress: BTreeMap<String, TaskProgress>,
    /// Artifact values with producer and timestamp stripped.
    pub artifacts: BTreeMap<String, Value>,
    pub run_state: RunState,
    /// Set when the run itself failed, e.g. on timeout.
    pub error: Option<String>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Partial
    }

    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks_with(TaskStatus::Failed)
    }

    pub fn successful_tasks(&self) -> Vec<&str> {
        self.tasks_with(TaskStatus::Success)
    }

    fn tasks_with(&self, status: TaskStatus) -> Vec<&str> {
        self.task_results
            .iter()
            .filter(|(_, result)| result.status == status)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn result(&self, task: &str) -> Option<&TaskResult> {
        self.task_results.get(task)
    }

    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let succeeded = self.successful_tasks();
        let failed = self.failed_tasks();
        let mut lines = vec![
            format!("Run {}: {}", self.id.short(), self.status.as_str().to_uppercase()),
            format!("Duration: {}ms", self.total_duration_ms),
            format!(
                "Tasks: {} succeeded, {} failed",
                succeeded.len(),
                failed.len()
            ),
        ];
        if !failed.is_empty() {
            lines.push(format!("Failed: {}", failed.join(", ")));
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {}", error));
        }
        lines.join("\n")
    }

    /// Turn anything but a full success into an error.
    pub fn ensure_success(&self) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(Error::TaskFailed(error.clone()));
        }
        match self.status {
            RunStatus::Success => Ok(()),
            RunStatus::Cancelled => Err(Error::TaskFailed("run cancelled".to_string())),
            _ => Err(Error::TaskFailed(self.failed_tasks().join(", "))),
        }
    }
}

type ProgressFn = Arc<dyn Fn(&str, TaskStatus, &str) + Send + Sync>;
type StartFn = Arc<dyn Fn(&str) + Send + Sync>;
type CompleteFn = Arc<dyn Fn(&str, &TaskResult) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    progress: Vec<ProgressFn>,
    start: Vec<StartFn>,
    complete: Vec<CompleteFn>,
    error: Vec<ErrorFn>,
}

/// State shared between the runner and the hook it installs.
#[derive(Default)]
struct Shared {
    callbacks: Mutex<Callbacks>,
    progress: Mutex<BTreeMap<String, TaskProgress>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Call a user callback, logging instead of propagating a panic.
fn guarded(kind: &str, task: &str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        sflog_warn!(
            "runner: {} callback for {} failed: {}",
            kind,
            task,
            panic_message(&*payload)
        );
    }
}

impl Shared {
    fn handle(&self, event: &SchedulerEvent) {
        let callbacks = lock(&self.callbacks).clone();
        match event {
            SchedulerEvent::PreTask { task } => {
                {
                    let mut progress = lock(&self.progress);
                    let entry = progress
                        .entry(task.clone())
                        .or_insert_with(|| TaskProgress::new(task));
                    entry.status = TaskStatus::Running;
                    entry.started_at = Some(Utc::now());
                }
                for cb in &callbacks.start {
                    guarded("start", task, || cb(task));
                }
                for cb in &callbacks.progress {
                    guarded("progress", task, || cb(task, TaskStatus::Running, "Started"));
                }
            }
            SchedulerEvent::PostTask { task, result } => {
                {
                    let mut progress = lock(&self.progress);
                    let entry = progress
                        .entry(task.clone())
                        .or_insert_with(|| TaskProgress::new(task));
                    let now = Utc::now();
                    entry.status = result.status;
                    entry.completed_at = Some(now);
                    entry.message = result.message.clone();
                    if let Some(started) = entry.started_at {
                        entry.duration_ms =
                            (now - started).num_milliseconds().max(0) as u64;
                    }
                    if result.is_failed() {
                        entry.error = Some(if result.errors.is_empty() {
                            result.message.clone()
                        } else {
                            result.errors.join("; ")
                        });
                    }
                }
                for cb in &callbacks.complete {
                    guarded("complete", task, || cb(task, result));
                }
                for cb in &callbacks.progress {
                    guarded("progress", task, || cb(task, result.status, &result.message));
                }
            }
            SchedulerEvent::Error { task, error } => {
                for cb in &callbacks.error {
                    guarded("error", task, || cb(task, error));
                }
            }
            SchedulerEvent::Complete { .. } => {}
        }
    }
}

/// Runs a configured [`Scheduler`] and reports progress.
///
/// # Example
///
/// ```ignore
/// let mut runner = PipelineRunner::new(scheduler);
/// runner.on_progress(|task, status, message| println!("{task}: {status} {message}"));
/// let result = runner.run().await;
/// if result.is_success() {
///     let code = result.artifact("code");
/// }
/// ```
pub struct PipelineRunner {
    scheduler: Scheduler,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl PipelineRunner {
    pub fn new(mut scheduler: Scheduler) -> Self {
        let shared = Arc::new(Shared::default());
        let hook_shared = Arc::clone(&shared);
        scheduler.on_event(move |event| hook_shared.handle(event));
        Self {
            scheduler,
            shared,
            timeout: None,
        }
    }

    /// Fail the run if it takes longer than `timeout`. Tasks already
    /// running are not interrupted.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn on_progress<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&str, TaskStatus, &str) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).progress.push(Arc::new(callback));
        self
    }

    pub fn on_task_start<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).start.push(Arc::new(callback));
        self
    }

    pub fn on_task_complete<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&str, &TaskResult) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).complete.push(Arc::new(callback));
        self
    }

    pub fn on_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).error.push(Arc::new(callback));
        self
    }

    /// Stop scheduling new work. In-flight tasks run to completion. Later
    /// runs start uncancelled.
    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub async fn run(&mut self) -> RunResult {
        let id = RunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        lock(&self.shared.progress).clear();
        sflog!(
            "runner: run {} for {} started",
            id.short(),
            self.scheduler.spec().name
        );

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.scheduler.execute())
                .await
                .map_err(|_| Error::Timeout(limit)),
            None => Ok(self.scheduler.execute().await),
        };

        let (task_results, error) = match outcome {
            Ok(results) => (results, None),
            Err(e) => {
                sflog_error!("runner: run {} failed: {}", id.short(), e);
                let message = e.to_string();
                let results = self.scheduler.abort(&message);
                self.notify_run_failure(&message);
                (results, Some(message))
            }
        };
        let state = self.scheduler.state().clone();

        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            determine_status(&state)
        };
        let artifacts = state
            .artifacts
            .iter()
            .map(|(key, artifact)| (key.clone(), artifact.value.clone()))
            .collect();

        let result = RunResult {
            id,
            spec_name: self.scheduler.spec().name.clone(),
            status,
            started_at,
            completed_at: Utc::now(),
            total_duration_ms: clock.elapsed().as_millis() as u64,
            task_results,
            task_progress: lock(&self.shared.progress).clone(),
            artifacts,
            run_state: state,
            error,
        };
        sflog!(
            "runner: run {} {} in {}ms",
            id.short(),
            result.status.as_str(),
            result.total_duration_ms
        );
        result
    }

    fn notify_run_failure(&self, message: &str) {
        let callbacks = lock(&self.shared.callbacks).clone();
        for cb in &callbacks.progress {
            guarded("progress", "pipeline", || cb("pipeline", TaskStatus::Failed, message));
        }
    }
}

fn determine_status(state: &RunState) -> RunStatus {
    if state.cancelled {
        RunStatus::Cancelled
    } else if state.failed.is_empty() {
        RunStatus::Success
    } else if state.completed.is_empty() {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("scheduler", &self.scheduler)
            .field("timeout", &self.timeout)
            .finish()
    }
}
