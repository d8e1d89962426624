//! Core domain models for orchestration.
//!
//! This module contains the task capability, its result type and the
//! dependency graph the scheduler derives execution levels from.

pub mod dag;
pub mod task;

pub use dag::{TaskGraph, TaskNode};
pub use task::{BlockInfo, FnTask, Task, TaskContext, TaskResult, TaskSections, TaskStatus};
