//! Dependency-respecting task scheduler.
//!
//! The Scheduler computes execution levels from the registered tasks and
//! runs them level by level. Task bodies run on the blocking pool; all
//! bookkeeping (completed/failed sets, artifacts, message log) happens on
//! the task driving [`Scheduler::execute`], so there is a single writer.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::dag::{TaskGraph, TaskNode};
use crate::core::task::{BlockInfo, Task, TaskContext, TaskResult, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::hooks::{Hooks, SchedulerEvent};
use crate::orchestration::router::SectionRouter;
use crate::orchestration::state::{MessageKind, RunState};
use crate::spec::Specification;
use crate::util::blocking;
use crate::{sflog, sflog_debug, sflog_warn};

/// How tasks inside one execution level are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStrategy {
    /// One at a time, highest priority first.
    #[default]
    Sequential,
    /// All tasks of a level concurrently.
    Dag,
}

impl std::fmt::Display for FlowStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowStrategy::Sequential => write!(f, "sequential"),
            FlowStrategy::Dag => write!(f, "dag"),
        }
    }
}

/// What happens after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// No further levels run. Under the DAG strategy the in-flight level
    /// still finishes.
    #[default]
    StopOnFirstFailure,
    /// Keep going; dependents of a failed task fail their dependency check.
    Continue,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::StopOnFirstFailure => write!(f, "stop_on_first_failure"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

/// A task plus its scheduling declarations.
#[derive(Clone)]
pub struct TaskRegistration {
    pub task: Arc<dyn Task>,
    pub depends_on: Vec<String>,
    pub provides: Vec<String>,
    pub priority: i32,
}

impl TaskRegistration {
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            task,
            depends_on: Vec::new(),
            provides: Vec::new(),
            priority: 0,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn provides<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }
}

impl std::fmt::Debug for TaskRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistration")
            .field("name", &self.task.name())
            .field("depends_on", &self.depends_on)
            .field("provides", &self.provides)
            .field("priority", &self.priority)
            .finish()
    }
}

/// A task that passed its dependency check, with its context snapshot.
struct PreparedTask {
    name: String,
    task: Arc<dyn Task>,
    ctx: TaskContext,
}

impl PreparedTask {
    async fn invoke(self) -> (String, TaskResult) {
        let PreparedTask { name, task, ctx } = self;
        let result = match blocking(move || task.execute(&ctx)).await {
            Ok(result) => result,
            Err(e) => TaskResult::failure(format!("Task {} raised: {}", name, e))
                .with_error(e.to_string()),
        };
        (name, result)
    }
}

/// Scheduler for one flat task set.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use specflow::core::{FnTask, TaskResult};
/// use specflow::orchestration::Scheduler;
/// use specflow::spec::Specification;
///
/// let mut scheduler = Scheduler::new(Arc::new(Specification::new("payments")));
/// scheduler.register(
///     FnTask::new("build", |_| Ok(TaskResult::success("built"))).into_arc(),
///     &[],
///     &["artifact"],
///     0,
/// )?;
/// let results = scheduler.execute().await;
/// ```
pub struct Scheduler {
    spec: Arc<Specification>,
    tasks: HashMap<String, TaskRegistration>,
    graph: TaskGraph,
    strategy: FlowStrategy,
    failure_policy: FailurePolicy,
    router: SectionRouter,
    include_optional: bool,
    max_section_size: Option<usize>,
    dry_run: bool,
    project_root: PathBuf,
    block: Option<BlockInfo>,
    parent_context: Value,
    rule_ids: Vec<String>,
    hooks: Hooks,
    cancel: CancellationToken,
    /// Tokens supplied by the caller are never replaced.
    external_cancel: bool,
    state: RunState,
    results: BTreeMap<String, TaskResult>,
}

impl Scheduler {
    pub fn new(spec: Arc<Specification>) -> Self {
        Self {
            spec,
            tasks: HashMap::new(),
            graph: TaskGraph::new(),
            strategy: FlowStrategy::default(),
            failure_policy: FailurePolicy::default(),
            router: SectionRouter::new(),
            include_optional: true,
            max_section_size: None,
            dry_run: false,
            project_root: PathBuf::from("."),
            block: None,
            parent_context: Value::Object(Default::default()),
            rule_ids: Vec::new(),
            hooks: Hooks::new(),
            cancel: CancellationToken::new(),
            external_cancel: false,
            state: RunState::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: FlowStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Apply run settings from a [`Config`].
    pub fn with_config(mut self, config: &Config) -> Self {
        self.strategy = config.strategy;
        self.failure_policy = config.failure_policy;
        self.include_optional = config.include_optional_sections;
        self.max_section_size = config.max_section_size;
        self.dry_run = config.dry_run;
        self
    }

    pub fn with_router(mut self, router: SectionRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn with_block(mut self, block: BlockInfo) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_parent_context(mut self, context: Value) -> Self {
        self.parent_context = context;
        self
    }

    pub fn with_rule_ids(mut self, rule_ids: Vec<String>) -> Self {
        self.rule_ids = rule_ids;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Share a caller-owned token. Once it is cancelled every later run
    /// is cancelled too.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self.external_cancel = true;
        self
    }

    /// Register a task with its dependencies, produced artifacts and
    /// priority.
    pub fn register(
        &mut self,
        task: Arc<dyn Task>,
        depends_on: &[&str],
        provides: &[&str],
        priority: i32,
    ) -> Result<()> {
        self.register_with(
            TaskRegistration::new(task)
                .depends_on(depends_on.iter().copied())
                .provides(provides.iter().copied())
                .priority(priority),
        )
    }

    /// Register a prepared [`TaskRegistration`].
    ///
    /// Rejects duplicate names and artifact keys another task already
    /// provides.
    pub fn register_with(&mut self, registration: TaskRegistration) -> Result<()> {
        let name = registration.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(Error::DuplicateTask(name));
        }

        let conflict = {
            let producers = self.graph.producers();
            registration.provides.iter().find_map(|key| {
                producers
                    .get(key.as_str())
                    .map(|first| (key.clone(), first.to_string()))
            })
        };
        if let Some((key, first)) = conflict {
            return Err(Error::ArtifactConflict {
                key,
                first,
                second: name,
            });
        }

        self.graph.add_task(TaskNode {
            name: name.clone(),
            depends_on: registration.depends_on.clone(),
            provides: registration.provides.clone(),
            priority: registration.priority,
        })?;

        if let Some(sections) = registration.task.sections() {
            self.router
                .register(&name, sections.required, sections.optional);
        }

        sflog_debug!(
            "scheduler: registered {} (depends on {:?}, provides {:?})",
            name,
            registration.depends_on,
            registration.provides
        );
        self.state.pending.insert(name.clone());
        self.tasks.insert(name, registration);
        Ok(())
    }

    /// Add a hook called synchronously for every event.
    pub fn on_event<F>(&mut self, hook: F)
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.hooks.add(hook);
    }

    /// Mirror events to a channel.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        self.hooks.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation. Running tasks finish; nothing new
    /// starts. A cancel issued before [`Scheduler::execute`] applies to the
    /// next run only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn spec(&self) -> &Arc<Specification> {
        &self.spec
    }

    pub fn strategy(&self) -> FlowStrategy {
        self.strategy
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn router_mut(&mut self) -> &mut SectionRouter {
        &mut self.router
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Registered task names in registration order.
    pub fn task_names(&self) -> Vec<String> {
        self.graph.names()
    }

    pub fn execution_levels(&self) -> Vec<Vec<String>> {
        self.graph.execution_levels()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn results(&self) -> &BTreeMap<String, TaskResult> {
        &self.results
    }

    pub fn result(&self, task: &str) -> Option<&TaskResult> {
        self.results.get(task)
    }

    /// Run every registered task once.
    ///
    /// Never fails: task errors and panics become failed results, and every
    /// task has a terminal result when this returns.
    pub async fn execute(&mut self) -> BTreeMap<String, TaskResult> {
        self.reset();
        self.report_graph_problems();

        let levels = self.graph.execution_levels();
        sflog!(
            "scheduler: {} tasks in {} levels ({}, {})",
            self.tasks.len(),
            levels.len(),
            self.strategy,
            self.failure_policy
        );

        let mut stopped = false;
        for (index, level) in levels.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.state.cancelled = true;
                break;
            }
            sflog_debug!("scheduler: level {}: {:?}", index, level);

            let level_failed = match self.strategy {
                FlowStrategy::Sequential => self.run_sequential(level).await,
                FlowStrategy::Dag => self.run_concurrent(level).await,
            };

            if level_failed && self.failure_policy == FailurePolicy::StopOnFirstFailure {
                sflog!("scheduler: stopping after failure in level {}", index);
                stopped = true;
                break;
            }
            if self.state.cancelled {
                break;
            }
        }

        let reason = if self.state.cancelled {
            "run cancelled"
        } else if stopped {
            "run stopped after a failure"
        } else {
            "run ended"
        };
        self.finalize_unstarted(reason);
        self.complete()
    }

    /// Close a run whose [`Scheduler::execute`] future was dropped, e.g. by
    /// an outer timeout.
    ///
    /// Tasks still marked running fail with "Not finished", tasks that never
    /// started are finalized as after a cancel, and the Complete event fires.
    /// Calling this after a run that finished normally only re-emits
    /// Complete.
    pub fn abort(&mut self, reason: &str) -> BTreeMap<String, TaskResult> {
        sflog_warn!("scheduler: run aborted: {}", reason);
        self.cancel.cancel();
        self.state.cancelled = true;

        let running: Vec<String> = self.state.running.iter().cloned().collect();
        for name in running {
            let result = TaskResult::failure(format!("Not finished: {}", reason))
                .with_error(reason.to_string());
            self.finish(&name, result);
        }
        self.finalize_unstarted(reason);
        self.complete()
    }

    fn complete(&mut self) -> BTreeMap<String, TaskResult> {
        let event = SchedulerEvent::Complete {
            completed: self.state.completed.iter().cloned().collect(),
            failed: self.state.failed.iter().cloned().collect(),
            skipped: self.state.skipped.iter().cloned().collect(),
            cancelled: self.state.cancelled,
        };
        self.hooks.emit(&event);
        sflog!(
            "scheduler: done, {} completed, {} failed, {} skipped",
            self.state.completed.len(),
            self.state.failed.len(),
            self.state.skipped.len()
        );

        if self.cancel.is_cancelled() && !self.external_cancel {
            sflog_debug!("scheduler: cancellation consumed, re-armed for the next run");
            self.cancel = CancellationToken::new();
        }
        self.results.clone()
    }

    fn reset(&mut self) {
        self.state = RunState::new();
        self.state.pending = self.tasks.keys().cloned().collect();
        self.results.clear();
    }

    fn report_graph_problems(&self) {
        for cycle in self.graph.cycles() {
            sflog_warn!("scheduler: dependency cycle between {}", cycle.join(", "));
        }
        for (task, dep) in self.graph.missing_dependencies() {
            sflog_warn!("scheduler: {} depends on unregistered task {}", task, dep);
        }
    }

    /// Returns true when a task in the level failed.
    async fn run_sequential(&mut self, level: &[String]) -> bool {
        let mut failed = false;
        for name in level {
            if self.cancel.is_cancelled() {
                self.state.cancelled = true;
                break;
            }
            let task_failed = match self.prepare(name) {
                Some(prepared) => {
                    let (name, result) = prepared.invoke().await;
                    self.finish(&name, result)
                }
                None => true,
            };
            if task_failed {
                failed = true;
                if self.failure_policy == FailurePolicy::StopOnFirstFailure {
                    break;
                }
            }
        }
        failed
    }

    /// Returns true when a task in the level failed.
    async fn run_concurrent(&mut self, level: &[String]) -> bool {
        let mut failed = false;
        let mut prepared = Vec::with_capacity(level.len());
        for name in level {
            match self.prepare(name) {
                Some(task) => prepared.push(task),
                None => failed = true,
            }
        }

        let outcomes = join_all(prepared.into_iter().map(PreparedTask::invoke)).await;
        for (name, result) in outcomes {
            failed |= self.finish(&name, result);
        }
        failed
    }

    /// Re-check dependencies and move the task to running. A task whose
    /// dependencies are not all completed is failed here and never invoked.
    fn prepare(&mut self, name: &str) -> Option<PreparedTask> {
        let task = Arc::clone(&self.tasks.get(name)?.task);

        if !self.graph.dependencies_satisfied(name, &self.state.completed) {
            self.reject(name);
            return None;
        }

        self.state.pending.remove(name);
        self.state.running.insert(name.to_string());
        self.state.execution_order.push(name.to_string());
        self.hooks.emit(&SchedulerEvent::PreTask {
            task: name.to_string(),
        });

        Some(PreparedTask {
            name: name.to_string(),
            task,
            ctx: self.context_for(name),
        })
    }

    fn context_for(&self, name: &str) -> TaskContext {
        TaskContext {
            task_name: name.to_string(),
            spec: Arc::clone(&self.spec),
            sections: self.router.route(
                &self.spec,
                name,
                self.include_optional,
                self.max_section_size,
            ),
            artifacts: self.state.artifact_values(),
            previous_results: self.state.previous_results(),
            block: self.block.clone(),
            parent_context: self.parent_context.clone(),
            rule_ids: self.rule_ids.clone(),
            project_root: self.project_root.clone(),
            dry_run: self.dry_run,
        }
    }

    fn missing_dependencies(&self, name: &str) -> Vec<String> {
        self.graph
            .get(name)
            .map(|node| {
                node.depends_on
                    .iter()
                    .filter(|dep| !self.state.completed.contains(*dep))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn reject(&mut self, name: &str) {
        let missing = self.missing_dependencies(name);
        sflog_debug!("scheduler: {} blocked on {:?}", name, missing);

        self.state.pending.remove(name);
        self.state.failed.insert(name.to_string());
        self.state.push_message(
            "orchestrator",
            name,
            MessageKind::Error,
            json!({"reason": "Dependencies not satisfied", "missing": missing}),
        );

        let result = dependency_failure(name, &missing);
        self.record(name, result);
    }

    /// Record a finished task. Returns true when it failed.
    fn finish(&mut self, name: &str, result: TaskResult) -> bool {
        let result = if result.status.is_terminal() {
            result
        } else {
            TaskResult::failure(format!(
                "Task {} returned non-terminal status {}",
                name, result.status
            ))
        };

        self.state.running.remove(name);
        match result.status {
            TaskStatus::Success => {
                self.state.completed.insert(name.to_string());
                self.publish_artifacts(name, &result);
            }
            TaskStatus::Skipped => {
                self.state.skipped.insert(name.to_string());
            }
            _ => {
                self.state.failed.insert(name.to_string());
            }
        }
        self.state.log_result(name, &result);

        let failed = result.is_failed();
        self.record(name, result);
        failed
    }

    fn record(&mut self, name: &str, result: TaskResult) {
        self.results.insert(name.to_string(), result.clone());
        let failed = result.is_failed();
        let message = result.message.clone();
        self.hooks.emit(&SchedulerEvent::PostTask {
            task: name.to_string(),
            result,
        });
        if failed {
            self.hooks.emit(&SchedulerEvent::Error {
                task: name.to_string(),
                error: message,
            });
        }
    }

    fn publish_artifacts(&mut self, name: &str, result: &TaskResult) {
        let Some(registration) = self.tasks.get(name) else {
            return;
        };
        for key in &registration.provides {
            match result.data.get(key) {
                Some(value) => {
                    if !self.state.publish(key, value.clone(), name) {
                        sflog_warn!(
                            "scheduler: artifact {} already written, dropping value from {}",
                            key,
                            name
                        );
                    }
                }
                None => sflog_debug!("scheduler: {} did not produce {}", name, key),
            }
        }
    }

    /// Give every task that never started a terminal result.
    fn finalize_unstarted(&mut self, reason: &str) {
        if self.state.pending.is_empty() {
            return;
        }
        let unstarted: Vec<String> = self.state.pending.iter().cloned().collect();
        let doomed = self.graph.downstream_of(&self.state.failed);

        for name in unstarted {
            self.state.pending.remove(&name);
            let result = if doomed.contains(&name) {
                self.state.failed.insert(name.clone());
                dependency_failure(&name, &self.missing_dependencies(&name))
            } else {
                self.state.skipped.insert(name.clone());
                TaskResult::skipped(format!("Not started: {}", reason))
            };
            self.record(&name, result);
        }
    }
}

fn dependency_failure(name: &str, missing: &[String]) -> TaskResult {
    let mut result = TaskResult::failure(format!("Dependencies not satisfied for {}", name));
    result.errors = missing
        .iter()
        .map(|dep| format!("dependency {} not completed", dep))
        .collect();
    result
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("spec", &self.spec.name)
            .field("tasks", &self.graph.names())
            .field("strategy", &self.strategy)
            .field("failure_policy", &self.failure_policy)
            .field("hooks", &self.hooks)
            .finish()
    }
}
