//! Orchestration layer.
//!
//! This module provides the dependency-respecting [`Scheduler`], the
//! hierarchical [`BlockPipeline`] that runs a task list over a block tree,
//! the [`SectionRouter`] that narrows what each task sees, the
//! [`IncrementalTracker`] that detects changed sections between runs, and
//! the [`PipelineRunner`] that reports progress and assembles a
//! [`RunResult`].

pub mod hooks;
pub mod incremental;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod runner;
pub mod scheduler;
pub mod state;

pub use hooks::{HookFn, Hooks, SchedulerEvent};
pub use incremental::{
    compute_hash, diff, map_changes_to_implementation_areas, parse_sections, snapshot,
    snapshot_with_path,
    ChangeSet, FileSnapshotStore, IncrementalContext, IncrementalTracker, MemorySnapshotStore,
    SectionHash, Snapshot, SnapshotStore,
};
pub use pipeline::{BlockPipeline, BlockResult, HierarchyResult, HierarchyStatus, ProcessingOrder};
pub use registry::{RegistryEntry, TaskRegistry};
pub use router::{RoutedSection, RoutedSpec, SectionRouter};
pub use runner::{PipelineRunner, RunId, RunResult, RunStatus, TaskProgress};
pub use scheduler::{FailurePolicy, FlowStrategy, Scheduler, TaskRegistration};
pub use state::{Artifact, FlowMessage, MessageKind, RunState};
