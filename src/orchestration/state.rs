//! Run state shared by the tasks of one orchestration run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};

use crate::core::task::{TaskResult, TaskStatus};

/// Kind of an entry in the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Result,
    Error,
    Event,
}

/// One entry of the ordered message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowMessage {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// A value published by exactly one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub value: Value,
    pub producer: String,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state of one run. Only the orchestrating task writes to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub completed: BTreeSet<String>,
    pub running: BTreeSet<String>,
    pub pending: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
    /// Task names in the order they were started.
    pub execution_order: Vec<String>,
    pub messages: Vec<FlowMessage>,
    pub artifacts: HashMap<String, Artifact>,
    pub cancelled: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an artifact. The first writer of a key wins; returns false
    /// when the key is already owned by another task.
    pub fn publish(&mut self, key: &str, value: Value, producer: &str) -> bool {
        match self.artifacts.get(key) {
            Some(existing) if existing.producer != producer => false,
            _ => {
                self.artifacts.insert(
                    key.to_string(),
                    Artifact {
                        value,
                        producer: producer.to_string(),
                        timestamp: Utc::now(),
                    },
                );
                true
            }
        }
    }

    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key).map(|a| &a.value)
    }

    /// Artifact values with their envelopes stripped.
    pub fn artifact_values(&self) -> HashMap<String, Value> {
        self.artifacts
            .iter()
            .map(|(key, artifact)| (key.clone(), artifact.value.clone()))
            .collect()
    }

    pub fn push_message(&mut self, from: &str, to: &str, kind: MessageKind, payload: Value) {
        self.messages.push(FlowMessage {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            payload,
            timestamp: Utc::now(),
        });
    }

    /// Record a finished task's outcome in the message log.
    pub fn log_result(&mut self, task: &str, result: &TaskResult) {
        self.push_message(
            task,
            "orchestrator",
            MessageKind::Result,
            json!({
                "status": result.status,
                "message": result.message,
            }),
        );
    }

    /// Last logged outcome of `task`, if any.
    pub fn last_result(&self, task: &str) -> Option<TaskResult> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == MessageKind::Result && m.from == task)
            .and_then(result_from_payload)
    }

    /// Last logged outcome of every task that has one.
    pub fn previous_results(&self) -> HashMap<String, TaskResult> {
        let mut out = HashMap::new();
        for message in self.messages.iter().rev() {
            if message.kind != MessageKind::Result || out.contains_key(&message.from) {
                continue;
            }
            if let Some(result) = result_from_payload(message) {
                out.insert(message.from.clone(), result);
            }
        }
        out
    }

    pub fn status_of(&self, task: &str) -> TaskStatus {
        if self.completed.contains(task) {
            TaskStatus::Success
        } else if self.failed.contains(task) {
            TaskStatus::Failed
        } else if self.skipped.contains(task) {
            TaskStatus::Skipped
        } else if self.running.contains(task) {
            TaskStatus::Running
        } else {
            TaskStatus::Pending
        }
    }
}

fn result_from_payload(message: &FlowMessage) -> Option<TaskResult> {
    let status: TaskStatus = serde_json::from_value(message.payload.get("status")?.clone()).ok()?;
    let text = message
        .payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(TaskResult::new(status, text))
}
