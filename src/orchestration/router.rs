//! Routes specification sections to the tasks that need them.
//!
//! Tasks only see the sections they declared, which keeps prompts small.
//! When a size budget is set, sections that would overflow it are replaced
//! by a truncated summary; a requested section is never dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::task::TaskSections;
use crate::sflog_trace;
use crate::spec::{SectionId, Specification};
use crate::util::truncate_chars;

/// Characters of a section kept in a summary.
const SUMMARY_CHARS: usize = 200;
/// Size charged for a summary against the budget.
const SUMMARY_COST: usize = 50;
/// Serialized characters per size unit.
const CHARS_PER_UNIT: usize = 4;

/// One section of a routed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedSection {
    pub id: SectionId,
    pub content: Value,
    /// True when `content` is a truncated summary.
    pub summarized: bool,
}

/// A specification filtered to the sections one task needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RoutedSpec {
    pub task: String,
    /// Sections in request order.
    pub sections: Vec<RoutedSection>,
    pub size_estimate: usize,
}

impl RoutedSpec {
    pub fn get(&self, id: SectionId) -> Option<&Value> {
        self.sections
            .iter()
            .find(|section| section.id == id)
            .map(|section| &section.content)
    }

    pub fn contains(&self, id: SectionId) -> bool {
        self.sections.iter().any(|section| section.id == id)
    }

    pub fn section_ids(&self) -> Vec<SectionId> {
        self.sections.iter().map(|section| section.id).collect()
    }

    /// Flatten into one markdown-ish text block.
    pub fn to_prompt_context(&self) -> String {
        let mut lines = vec![format!("# Relevant Spec Sections for {}\n", self.task)];
        for section in &self.sections {
            lines.push(format!("## {}", section.id.title()));
            lines.push(format_section(&section.content));
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

fn format_section(content: &Value) -> String {
    match content {
        Value::Null => "(empty)".to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => format!("- {}", text),
                other => format!("- {}", other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Section needs of the standard task set.
fn default_mappings() -> HashMap<String, TaskSections> {
    use SectionId::*;

    let table: [(&str, Vec<SectionId>, Vec<SectionId>); 7] = [
        (
            "coding_agent",
            vec![Overview, Inputs, Outputs, ApiContract, Dependencies],
            vec![Implementation, ErrorHandling],
        ),
        (
            "test_generator_agent",
            vec![TestCases, EdgeCases, Inputs, Outputs],
            vec![ApiContract, ErrorHandling],
        ),
        (
            "security_agent",
            vec![Security, ApiContract],
            vec![Inputs, Outputs, Dependencies],
        ),
        (
            "performance_agent",
            vec![Performance, ApiContract],
            vec![Dependencies, Implementation],
        ),
        (
            "code_review_agent",
            vec![Overview, ApiContract, Security, ErrorHandling],
            vec![Performance, Implementation],
        ),
        ("linter_agent", vec![Metadata], vec![]),
        (
            "architecture_agent",
            vec![Overview, Dependencies, ApiContract],
            vec![Implementation],
        ),
    ];

    table
        .into_iter()
        .map(|(name, required, optional)| (name.to_string(), TaskSections::new(required, optional)))
        .collect()
}

/// Maps task names to the sections they read.
#[derive(Debug, Clone)]
pub struct SectionRouter {
    mappings: HashMap<String, TaskSections>,
}

impl Default for SectionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionRouter {
    /// Router preloaded with the standard task table.
    pub fn new() -> Self {
        Self {
            mappings: default_mappings(),
        }
    }

    /// Router with no known tasks; every task gets every section.
    pub fn empty() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    /// Add or override a task's section needs.
    pub fn register(&mut self, task: &str, required: Vec<SectionId>, optional: Vec<SectionId>) {
        self.mappings
            .insert(task.to_string(), TaskSections::new(required, optional));
    }

    pub fn needs(&self, task: &str) -> Option<&TaskSections> {
        self.mappings.get(task)
    }

    /// Required sections of a known task; empty for unknown tasks.
    pub fn required_sections(&self, task: &str) -> Vec<SectionId> {
        self.mappings
            .get(task)
            .map(|needs| needs.required.clone())
            .unwrap_or_default()
    }

    /// Build the view of `spec` that `task` gets.
    ///
    /// Unknown tasks receive all sections with no budget applied. A budget
    /// of zero means no budget.
    pub fn route(
        &self,
        spec: &Specification,
        task: &str,
        include_optional: bool,
        max_size: Option<usize>,
    ) -> RoutedSpec {
        let Some(needs) = self.mappings.get(task) else {
            return extract(spec, task, &SectionId::ALL, None);
        };

        let mut wanted = needs.required.clone();
        if include_optional {
            wanted.extend(needs.optional.iter().copied());
        }
        extract(spec, task, &wanted, max_size.filter(|&max| max > 0))
    }
}

fn extract(
    spec: &Specification,
    task: &str,
    wanted: &[SectionId],
    max_size: Option<usize>,
) -> RoutedSpec {
    let mut routed = RoutedSpec {
        task: task.to_string(),
        ..RoutedSpec::default()
    };

    for &id in wanted {
        if routed.contains(id) {
            continue;
        }
        let content = spec.section_value(id);
        let size = estimate_size(&content);

        match max_size {
            Some(max) if routed.size_estimate + size > max => {
                sflog_trace!(
                    "router: {} section {} ({} units) summarized, budget {}",
                    task,
                    id,
                    size,
                    max
                );
                routed.sections.push(RoutedSection {
                    id,
                    content: Value::String(summarize(&content)),
                    summarized: true,
                });
                routed.size_estimate += SUMMARY_COST;
            }
            _ => {
                routed.sections.push(RoutedSection {
                    id,
                    content,
                    summarized: false,
                });
                routed.size_estimate += size;
            }
        }
    }

    routed
}

/// Size proxy: serialized length divided by four.
pub fn estimate_size(content: &Value) -> usize {
    if content.is_null() {
        return 0;
    }
    content.to_string().len() / CHARS_PER_UNIT
}

/// Head-truncated rendering of a section.
pub fn summarize(content: &Value) -> String {
    if content.is_null() {
        return "(empty)".to_string();
    }
    let text = content.to_string();
    let total = text.chars().count();
    if total <= SUMMARY_CHARS {
        return text;
    }
    format!(
        "{}... (truncated, {} chars total)",
        truncate_chars(&text, SUMMARY_CHARS),
        total
    )
}
