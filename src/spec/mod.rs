//! Specification model consumed by the orchestrator.
//!
//! This module contains the typed specification schema and the block tree
//! used by the hierarchical pipeline. Both are produced by an external
//! parser and are read-only during a run.

pub mod block;
pub mod schema;

pub use block::{Block, BlockId, BlockKind, BlockTree};
pub use schema::{
    Acceptance, ApiContract, Dependencies, EdgeCases, Endpoint, ErrorHandling, Implementation,
    InputParam, Inputs, Metadata, Outputs, Overview, Performance, SectionId, Security,
    Specification, SpecStatus, TestCase, TestCases,
};
