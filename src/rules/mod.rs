//! Rule gate for hierarchical runs.
//!
//! Rule *content* is supplied by callers through [`RuleCheck`]; this module
//! only decides which rules apply to a block, runs them, and reports
//! violations by severity. An `error` violation blocks a block's tasks.

mod engine;
mod same_as;

pub use engine::RuleEngine;
pub use same_as::{MergeMode, SameAsReference};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::spec::{Block, SectionId, Specification};

/// Level at which a rule is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleLevel {
    /// Applies to every block.
    #[default]
    Global,
    /// Applies to the declaring block and its descendants.
    Scoped,
    /// Applies only to the declaring block.
    Local,
}

/// Severity of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleSeverity {
    Info,
    #[default]
    Warning,
    Error,
}

impl RuleSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSeverity::Info => "info",
            RuleSeverity::Warning => "warning",
            RuleSeverity::Error => "error",
        }
    }
}

impl std::fmt::Display for RuleSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A check run against a block's resolved specification.
///
/// `section` is the section being validated, or `None` for a rule that
/// declares no sections and so covers the whole spec. Returns
/// `Some(message)` when the block violates the rule.
pub trait RuleCheck: Send + Sync {
    fn check(&self, block: &Block, spec: &Specification, section: Option<SectionId>)
        -> Option<String>;
}

impl<F> RuleCheck for F
where
    F: Fn(&Block, &Specification, Option<SectionId>) -> Option<String> + Send + Sync,
{
    fn check(
        &self,
        block: &Block,
        spec: &Specification,
        section: Option<SectionId>,
    ) -> Option<String> {
        self(block, spec, section)
    }
}

/// A validation rule.
#[derive(Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub level: RuleLevel,
    pub severity: RuleSeverity,
    /// Sections the rule reports against; empty means the whole spec.
    pub sections: Vec<SectionId>,
    pub description: String,
    pub enabled: bool,
    check: Arc<dyn RuleCheck>,
}

impl Rule {
    pub fn new(id: &str, name: &str, check: impl RuleCheck + 'static) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            level: RuleLevel::Global,
            severity: RuleSeverity::Warning,
            sections: Vec::new(),
            description: String::new(),
            enabled: true,
            check: Arc::new(check),
        }
    }

    pub fn with_level(mut self, level: RuleLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_severity(mut self, severity: RuleSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_sections(mut self, sections: Vec<SectionId>) -> Self {
        self.sections = sections;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub(crate) fn run(
        &self,
        block: &Block,
        spec: &Specification,
        section: Option<SectionId>,
    ) -> Option<String> {
        self.check.check(block, spec, section)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("level", &self.level)
            .field("severity", &self.severity)
            .field("sections", &self.sections)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// A rule failure found while validating one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: RuleSeverity,
    pub block_path: String,
    /// Section reported against, or `all`.
    pub section: String,
    pub message: String,
}

impl RuleViolation {
    pub fn is_blocking(&self) -> bool {
        self.severity == RuleSeverity::Error
    }
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} at {}:{}: {}",
            self.severity.as_str().to_uppercase(),
            self.rule_id,
            self.block_path,
            self.section,
            self.message
        )
    }
}
