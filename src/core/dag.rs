//! Task dependency graph.
//!
//! Holds the declared dependencies of registered tasks and derives
//! execution levels from them. Dependencies on names that were never
//! registered are kept on the node but have no edge.

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Walker};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result};

/// Scheduling view of one registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub name: String,
    pub depends_on: Vec<String>,
    pub provides: Vec<String>,
    /// Tie-break inside a level; higher runs first.
    pub priority: i32,
}

impl TaskNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            depends_on: Vec::new(),
            provides: Vec::new(),
            priority: 0,
        }
    }
}

/// Directed graph of tasks; an edge `a -> b` means `b` depends on `a`.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    task_index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, wiring edges to any already-registered dependencies and
    /// dependents.
    pub fn add_task(&mut self, node: TaskNode) -> Result<NodeIndex> {
        if self.task_index.contains_key(&node.name) {
            return Err(Error::DuplicateTask(node.name));
        }

        let name = node.name.clone();
        let deps = node.depends_on.clone();
        let index = self.graph.add_node(node);
        self.task_index.insert(name.clone(), index);

        for dep in &deps {
            if let Some(&dep_index) = self.task_index.get(dep) {
                self.graph.add_edge(dep_index, index, ());
            }
        }

        let dependents: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&other| {
                other != index && self.graph[other].depends_on.iter().any(|d| *d == name)
            })
            .collect();
        for dependent in dependents {
            self.graph.add_edge(index, dependent, ());
        }

        Ok(index)
    }

    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.task_index.get(name).map(|&index| &self.graph[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.task_index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Task names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .map(|index| self.graph[index].name.clone())
            .collect()
    }

    /// Names of the artifact keys declared by any task, with their producer.
    pub fn producers(&self) -> HashMap<&str, &str> {
        self.graph
            .node_weights()
            .flat_map(|node| {
                node.provides
                    .iter()
                    .map(move |key| (key.as_str(), node.name.as_str()))
            })
            .collect()
    }

    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Groups of task names that form dependency cycles.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self.graph.contains_edge(component[0], component[0])
            })
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|index| self.graph[index].name.clone())
                    .collect();
                names.sort();
                names
            })
            .collect()
    }

    /// `(task, dependency)` pairs where the dependency was never registered.
    pub fn missing_dependencies(&self) -> Vec<(String, String)> {
        self.graph
            .node_weights()
            .flat_map(|node| {
                node.depends_on
                    .iter()
                    .filter(|dep| !self.task_index.contains_key(*dep))
                    .map(move |dep| (node.name.clone(), dep.clone()))
            })
            .collect()
    }

    /// Whether every declared dependency of `name` is in `completed`.
    pub fn dependencies_satisfied(&self, name: &str, completed: &BTreeSet<String>) -> bool {
        self.get(name)
            .map(|node| node.depends_on.iter().all(|dep| completed.contains(dep)))
            .unwrap_or(false)
    }

    /// Every task reachable from `roots` along dependency edges, excluding
    /// the roots themselves.
    pub fn downstream_of(&self, roots: &BTreeSet<String>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for root in roots {
            let Some(&start) = self.task_index.get(root) else {
                continue;
            };
            for index in Dfs::new(&self.graph, start).iter(&self.graph) {
                let name = &self.graph[index].name;
                if !roots.contains(name) {
                    out.insert(name.clone());
                }
            }
        }
        out
    }

    /// Tasks that directly depend on `name`.
    pub fn dependents(&self, name: &str) -> Vec<&TaskNode> {
        match self.task_index.get(name) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .map(|neighbor| &self.graph[neighbor])
                .collect(),
            None => Vec::new(),
        }
    }

    // ========== Scheduling Operations ==========

    /// Partition the tasks into execution levels.
    ///
    /// Each round takes every remaining task whose dependencies all sit in
    /// earlier levels. When nothing qualifies but tasks remain (a cycle or
    /// a missing dependency) the remainder becomes one final level; those
    /// tasks then fail their own dependency check at run time. Inside a
    /// level tasks are ordered by descending priority, then registration
    /// order.
    pub fn execution_levels(&self) -> Vec<Vec<String>> {
        let mut remaining: Vec<&TaskNode> = self.graph.node_weights().collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let (mut ready, blocked): (Vec<&TaskNode>, Vec<&TaskNode>) = remaining
                .into_iter()
                .partition(|node| node.depends_on.iter().all(|dep| placed.contains(dep.as_str())));

            if ready.is_empty() {
                ready = blocked;
                remaining = Vec::new();
            } else {
                remaining = blocked;
            }

            ready.sort_by(|a, b| b.priority.cmp(&a.priority));
            placed.extend(ready.iter().map(|node| node.name.as_str()));
            levels.push(ready.into_iter().map(|node| node.name.clone()).collect());
        }

        levels
    }
}
