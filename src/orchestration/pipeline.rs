//! Hierarchical block pipeline.
//!
//! Runs one task list against every block of a [`BlockTree`], one depth
//! level at a time, handing each block the context its relatives exposed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::task::{BlockInfo, Task, TaskResult};
use crate::orchestration::router::SectionRouter;
use crate::orchestration::scheduler::{Scheduler, TaskRegistration};
use crate::rules::{RuleEngine, RuleViolation};
use crate::spec::{BlockId, BlockTree};
use crate::{sflog, sflog_debug, sflog_warn};

/// Direction in which depth levels are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingOrder {
    /// Deepest blocks first; parents see their children's results.
    #[default]
    BottomUp,
    /// Root first; children see their parent's exposed context.
    TopDown,
}

impl std::fmt::Display for ProcessingOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingOrder::BottomUp => write!(f, "bottom-up"),
            ProcessingOrder::TopDown => write!(f, "top-down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

/// Outcome of one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BlockResult {
    pub block_path: String,
    /// False when the run ended before this block was visited.
    pub processed: bool,
    pub success: bool,
    /// True when an error-severity violation kept the tasks from running.
    pub gated: bool,
    pub task_results: BTreeMap<String, TaskResult>,
    pub violations: Vec<RuleViolation>,
    /// What this block exposes to its relatives.
    pub context: Value,
}

impl BlockResult {
    fn unvisited(path: &str) -> Self {
        Self {
            block_path: path.to_string(),
            context: Value::Object(Map::new()),
            ..Self::default()
        }
    }

    pub fn failed_tasks(&self) -> Vec<&str> {
        self.task_results
            .iter()
            .filter(|(_, result)| result.is_failed())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Summary of a whole hierarchy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyResult {
    pub root_path: String,
    pub order: ProcessingOrder,
    pub status: HierarchyStatus,
    pub total_blocks: usize,
    pub processed_blocks: usize,
    pub failed_blocks: usize,
    /// Block paths in the order they were processed.
    pub execution_order: Vec<String>,
    pub block_results: BTreeMap<String, BlockResult>,
}

impl HierarchyResult {
    pub fn success_rate(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        (self.processed_blocks - self.failed_blocks) as f64 / self.total_blocks as f64
    }

    pub fn is_success(&self) -> bool {
        self.status == HierarchyStatus::Success
    }

    pub fn block(&self, path: &str) -> Option<&BlockResult> {
        self.block_results.get(path)
    }

    pub fn failed_block_paths(&self) -> Vec<&str> {
        self.block_results
            .values()
            .filter(|block| block.processed && !block.success)
            .map(|block| block.block_path.as_str())
            .collect()
    }

    pub fn summary(&self) -> Value {
        json!({
            "root_path": self.root_path,
            "order": self.order,
            "status": self.status,
            "total_blocks": self.total_blocks,
            "processed_blocks": self.processed_blocks,
            "failed_blocks": self.failed_blocks,
            "success_rate": self.success_rate(),
        })
    }
}

/// Applies one task list to every block of a hierarchy.
pub struct BlockPipeline {
    tree: BlockTree,
    rules: RuleEngine,
    tasks: Vec<TaskRegistration>,
    config: Config,
    router: SectionRouter,
    project_root: PathBuf,
    cancel: CancellationToken,
    external_cancel: bool,
}

impl BlockPipeline {
    pub fn new(tree: BlockTree) -> Self {
        Self {
            tree,
            rules: RuleEngine::new(),
            tasks: Vec::new(),
            config: Config::default(),
            router: SectionRouter::new(),
            project_root: PathBuf::from("."),
            cancel: CancellationToken::new(),
            external_cancel: false,
        }
    }

    pub fn with_rules(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskRegistration>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
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

    /// Share a caller-owned token. It is never re-armed.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self.external_cancel = true;
        self
    }

    /// Add a task with its per-block dependencies.
    pub fn add_task(
        &mut self,
        task: Arc<dyn Task>,
        depends_on: &[&str],
        provides: &[&str],
        priority: i32,
    ) {
        self.tasks.push(
            TaskRegistration::new(task)
                .depends_on(depends_on.iter().copied())
                .provides(provides.iter().copied())
                .priority(priority),
        );
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BlockTree {
        &mut self.tree
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop before the next block. Applies to the current or next run only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block ids grouped by depth in visiting order.
    pub fn ordered_levels(&self, order: ProcessingOrder) -> Vec<Vec<BlockId>> {
        let mut levels = self.tree.levels();
        if order == ProcessingOrder::BottomUp {
            levels.reverse();
        }
        levels
    }

    /// Process every block. Block failures are recorded, never propagated.
    pub async fn run(&mut self, order: ProcessingOrder) -> HierarchyResult {
        let mut result = HierarchyResult {
            root_path: self
                .tree
                .root()
                .map(|root| root.path.clone())
                .unwrap_or_default(),
            order,
            status: HierarchyStatus::Running,
            total_blocks: self.tree.len(),
            processed_blocks: 0,
            failed_blocks: 0,
            execution_order: Vec::new(),
            block_results: BTreeMap::new(),
        };
        sflog!(
            "pipeline: {} blocks, {} tasks, {}",
            result.total_blocks,
            self.tasks.len(),
            order
        );

        let mut cancelled = false;
        'levels: for level in self.ordered_levels(order) {
            for id in level {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'levels;
                }
                let Some(block) = self.tree.get(id) else {
                    continue;
                };
                let inbound = self.inbound_context(id, order, &result.block_results);
                let block_result = self.process_block(id, inbound).await;

                result.processed_blocks += 1;
                if !block_result.success {
                    result.failed_blocks += 1;
                }
                result.execution_order.push(block.path.clone());
                result
                    .block_results
                    .insert(block.path.clone(), block_result);
            }
        }

        for (_, block) in self.tree.iter() {
            result
                .block_results
                .entry(block.path.clone())
                .or_insert_with(|| BlockResult::unvisited(&block.path));
        }

        result.status = if cancelled {
            HierarchyStatus::Cancelled
        } else if result.failed_blocks == 0 {
            HierarchyStatus::Success
        } else {
            HierarchyStatus::Failed
        };
        sflog!(
            "pipeline: {:?}, {}/{} processed, {} failed",
            result.status,
            result.processed_blocks,
            result.total_blocks,
            result.failed_blocks
        );
        if self.cancel.is_cancelled() && !self.external_cancel {
            self.cancel = CancellationToken::new();
        }
        result
    }

    /// Context a block receives from relatives that were already processed.
    fn inbound_context(
        &self,
        id: BlockId,
        order: ProcessingOrder,
        done: &BTreeMap<String, BlockResult>,
    ) -> Value {
        let Some(block) = self.tree.get(id) else {
            return Value::Object(Map::new());
        };

        match order {
            ProcessingOrder::TopDown => self
                .tree
                .parent(id)
                .and_then(|parent| done.get(&parent.path))
                .map(|parent| parent.context.clone())
                .unwrap_or_else(|| Value::Object(Map::new())),
            ProcessingOrder::BottomUp if !block.is_leaf() => {
                let children: Vec<Value> = self
                    .tree
                    .children(id)
                    .into_iter()
                    .filter_map(|child| done.get(&child.path))
                    .map(|child| {
                        json!({
                            "path": child.block_path,
                            "success": child.success,
                            "context": child.context,
                        })
                    })
                    .collect();
                json!({ "children": children })
            }
            ProcessingOrder::BottomUp => Value::Object(Map::new()),
        }
    }

    async fn process_block(&self, id: BlockId, inbound: Value) -> BlockResult {
        let Some(block) = self.tree.get(id) else {
            return BlockResult::default();
        };
        let mut result = BlockResult {
            block_path: block.path.clone(),
            processed: true,
            ..BlockResult::default()
        };

        let spec = self
            .rules
            .resolve_same_as(&self.tree, id)
            .unwrap_or_else(|| block.spec.clone());
        let rule_ids: Vec<String> = self
            .rules
            .effective_rules(&self.tree, id)
            .into_iter()
            .map(|rule| rule.id)
            .collect();
        result.violations = self.rules.validate(&self.tree, id, &spec);

        let blocking: Vec<String> = result
            .violations
            .iter()
            .filter(|v| v.is_blocking())
            .map(ToString::to_string)
            .collect();
        if !blocking.is_empty() {
            if !self.config.dry_run {
                sflog_warn!(
                    "pipeline: {} gated by {} error violation(s)",
                    block.path,
                    blocking.len()
                );
                result.gated = true;
                result.context = json!({ "errors": blocking });
                return result;
            }
            sflog_debug!("pipeline: {} has error violations, dry run continues", block.path);
        }

        let mut scheduler = Scheduler::new(Arc::new(spec))
            .with_config(&self.config)
            .with_router(self.router.clone())
            .with_project_root(self.project_root.clone())
            .with_block(BlockInfo {
                path: block.path.clone(),
                name: block.name.clone(),
                depth: block.depth(),
            })
            .with_parent_context(inbound)
            .with_rule_ids(rule_ids)
            .with_cancellation(self.cancel.child_token());

        for registration in &self.tasks {
            if let Err(e) = scheduler.register_with(registration.clone()) {
                sflog_warn!("pipeline: {} could not register tasks: {}", block.path, e);
                result.context = json!({ "errors": [e.to_string()] });
                return result;
            }
        }

        result.task_results = scheduler.execute().await;
        let state = scheduler.state();
        result.success = state.failed.is_empty() && !state.cancelled;

        let artifacts: Map<String, Value> = state.artifact_values().into_iter().collect();
        result.context = json!({
            "block_path": block.path,
            "violations": result.violations,
            "artifacts": artifacts,
        });
        sflog_debug!(
            "pipeline: {} finished, success={}",
            block.path,
            result.success
        );
        result
    }
}

impl std::fmt::Debug for BlockPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPipeline")
            .field("blocks", &self.tree.len())
            .field("tasks", &self.tasks.len())
            .field("dry_run", &self.config.dry_run)
            .finish()
    }
}
