//! Scheduler lifecycle events and their dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::task::TaskResult;
use crate::util::panic_message;
use crate::{sflog_debug, sflog_warn};

/// Events emitted by the scheduler around each task and at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A task is about to start.
    PreTask { task: String },
    /// A task reached a terminal status.
    PostTask { task: String, result: TaskResult },
    /// A task failed.
    Error { task: String, error: String },
    /// The run is over.
    Complete {
        completed: Vec<String>,
        failed: Vec<String>,
        skipped: Vec<String>,
        cancelled: bool,
    },
}

impl SchedulerEvent {
    pub fn task(&self) -> Option<&str> {
        match self {
            SchedulerEvent::PreTask { task }
            | SchedulerEvent::PostTask { task, .. }
            | SchedulerEvent::Error { task, .. } => Some(task.as_str()),
            SchedulerEvent::Complete { .. } => None,
        }
    }
}

pub type HookFn = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

/// Synchronous callback list plus an optional channel subscriber.
///
/// A hook that panics is logged and otherwise ignored; hooks never abort
/// a run.
#[derive(Clone, Default)]
pub struct Hooks {
    callbacks: Vec<HookFn>,
    subscriber: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, hook: F)
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(hook));
    }

    /// Mirror every event to a channel. Replaces any earlier subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriber = Some(tx);
        rx
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn emit(&self, event: &SchedulerEvent) {
        for hook in &self.callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(event))) {
                sflog_warn!(
                    "hook failed on {:?}: {}",
                    event.task().unwrap_or("complete"),
                    panic_message(&*payload)
                );
            }
        }

        if let Some(tx) = &self.subscriber {
            if tx.send(event.clone()).is_err() {
                sflog_debug!("event subscriber dropped");
            }
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("callbacks", &self.callbacks.len())
            .field("subscribed", &self.subscriber.is_some())
            .finish()
    }
}
