//! "Same-as" section references between blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::spec::{SectionId, Specification};

/// How a borrowed section is combined with the block's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Replace the section entirely.
    #[default]
    Replace,
    /// Append the source's list fields to the target's.
    Extend,
    /// Union lists, update maps, fill empty scalars.
    Merge,
}

/// Reference to another block's section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SameAsReference {
    pub target_section: SectionId,
    /// Absolute block path or `../`-relative to the referencing block.
    pub source_block: String,
    /// Defaults to `target_section`.
    pub source_section: Option<SectionId>,
    #[serde(default)]
    pub merge_mode: MergeMode,
}

impl SameAsReference {
    pub fn new(target_section: SectionId, source_block: &str) -> Self {
        Self {
            target_section,
            source_block: source_block.to_string(),
            source_section: None,
            merge_mode: MergeMode::Replace,
        }
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    pub fn from_section(mut self, section: SectionId) -> Self {
        self.source_section = Some(section);
        self
    }

    pub fn effective_source_section(&self) -> SectionId {
        self.source_section.unwrap_or(self.target_section)
    }

    /// Resolve `source_block` against the referencing block's path.
    pub fn resolve_source_path(&self, current_path: &str) -> String {
        if !self.source_block.starts_with("../") {
            return self.source_block.clone();
        }

        let mut base: Vec<&str> = current_path.split('/').collect();
        let mut remaining = Vec::new();
        for part in self.source_block.split('/') {
            if part == ".." {
                // Going above the root clamps at the root.
                base.pop();
            } else if !part.is_empty() {
                remaining.push(part);
            }
        }
        base.extend(remaining);
        base.join("/")
    }

    /// Apply this reference to `target`, reading from `source`.
    pub fn apply(&self, target: &mut Specification, source: &Specification) -> Result<()> {
        let source_value = source.section_value(self.effective_source_section());
        let merged = match self.merge_mode {
            MergeMode::Replace => source_value,
            MergeMode::Extend => {
                let mut target_value = target.section_value(self.target_section);
                extend_lists(&mut target_value, &source_value);
                target_value
            }
            MergeMode::Merge => {
                let mut target_value = target.section_value(self.target_section);
                merge_values(&mut target_value, &source_value);
                target_value
            }
        };
        target.set_section_value(self.target_section, merged)
    }
}

fn extend_lists(target: &mut Value, source: &Value) {
    if let (Value::Object(target_map), Value::Object(source_map)) = (target, source) {
        for (key, source_field) in source_map {
            if let (Some(Value::Array(target_items)), Value::Array(source_items)) =
                (target_map.get_mut(key), source_field)
            {
                target_items.extend(source_items.iter().cloned());
            }
        }
    }
}

fn merge_values(target: &mut Value, source: &Value) {
    let (Value::Object(target_map), Value::Object(source_map)) = (target, source) else {
        return;
    };
    for (key, source_field) in source_map {
        if source_field.is_null() {
            continue;
        }
        let Some(existing) = target_map.get_mut(key) else {
            target_map.insert(key.clone(), source_field.clone());
            continue;
        };
        match (existing, source_field) {
            (Value::Array(target_items), Value::Array(source_items)) => {
                for item in source_items {
                    if !target_items.contains(item) {
                        target_items.push(item.clone());
                    }
                }
            }
            (Value::Object(target_obj), Value::Object(source_obj)) => {
                for (k, v) in source_obj {
                    target_obj.insert(k.clone(), v.clone());
                }
            }
            (existing, value) => {
                if is_empty_scalar(existing) {
                    *existing = value.clone();
                }
            }
        }
    }
}

fn is_empty_scalar(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}
