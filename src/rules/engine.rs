//! Effective rule computation, validation and same-as resolution.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::spec::{BlockId, BlockTree, SectionId, Specification};
use crate::util::panic_message;
use crate::{sflog_debug, sflog_warn};

use super::{Rule, RuleLevel, RuleViolation};

/// Decides which rules apply to a block and runs them.
///
/// Precedence is global, then ancestors' scoped rules from the root down,
/// then the block's own rules.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    global_rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_rules(rules: Vec<Rule>) -> Self {
        Self {
            global_rules: rules,
        }
    }

    pub fn add_global_rule(&mut self, rule: Rule) {
        self.global_rules.push(rule);
    }

    pub fn global_rules(&self) -> &[Rule] {
        &self.global_rules
    }

    /// All enabled rules that apply to `id`.
    pub fn effective_rules(&self, tree: &BlockTree, id: BlockId) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .global_rules
            .iter()
            .filter(|rule| rule.enabled)
            .cloned()
            .collect();

        for ancestor in tree.ancestors(id) {
            rules.extend(
                ancestor
                    .scoped_rules
                    .iter()
                    .filter(|rule| rule.enabled && rule.level != RuleLevel::Local)
                    .cloned(),
            );
        }

        if let Some(block) = tree.get(id) {
            rules.extend(block.scoped_rules.iter().filter(|rule| rule.enabled).cloned());
        }

        rules
    }

    /// Produce a copy of the block's specification with its same-as
    /// references applied. The stored block is left untouched.
    pub fn resolve_same_as(&self, tree: &BlockTree, id: BlockId) -> Option<Specification> {
        let block = tree.get(id)?;
        let mut resolved = block.spec.clone();

        for reference in &block.same_as {
            let source_path = reference.resolve_source_path(&block.path);
            let Some(source) = tree.block(&source_path) else {
                sflog_warn!(
                    "same-as: block {} references missing block {}",
                    block.path,
                    source_path
                );
                continue;
            };
            if let Err(e) = reference.apply(&mut resolved, &source.spec) {
                sflog_warn!(
                    "same-as: could not apply {} from {} to {}: {}",
                    reference.target_section,
                    source_path,
                    block.path,
                    e
                );
            } else {
                sflog_debug!(
                    "same-as: {} <- {}:{} ({:?})",
                    block.path,
                    source_path,
                    reference.effective_source_section(),
                    reference.merge_mode
                );
            }
        }

        Some(resolved)
    }

    /// Run every effective rule against `spec`, once per declared section
    /// (or once for the whole spec when none are declared).
    pub fn validate(&self, tree: &BlockTree, id: BlockId, spec: &Specification) -> Vec<RuleViolation> {
        let Some(block) = tree.get(id) else {
            return Vec::new();
        };

        let mut violations = Vec::new();
        for rule in self.effective_rules(tree, id) {
            let targets: Vec<Option<SectionId>> = if rule.sections.is_empty() {
                vec![None]
            } else {
                rule.sections.iter().copied().map(Some).collect()
            };

            for target in targets {
                let outcome = catch_unwind(AssertUnwindSafe(|| rule.run(block, spec, target)));
                let message = match outcome {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(payload) => format!("Validator error: {}", panic_message(&*payload)),
                };
                violations.push(RuleViolation {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    severity: rule.severity,
                    block_path: block.path.clone(),
                    section: target.map_or("all", |id| id.as_str()).to_string(),
                    message,
                });
            }
        }

        violations
    }
}
