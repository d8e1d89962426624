//! Hierarchical block tree.
//!
//! Blocks are stored in an arena owned by [`BlockTree`]. A block refers to
//! its parent by [`BlockId`] (lookup only) and owns the ordered list of its
//! children's ids, so the tree has no reference cycles.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::rules::{Rule, SameAsReference};
use crate::spec::Specification;

/// Index of a block inside its [`BlockTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub usize);

/// Role of a block in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Root,
    Component,
    Module,
    #[default]
    Leaf,
}

/// One node of the specification hierarchy.
#[derive(Debug, Clone)]
pub struct Block {
    /// Slash-delimited path encoding ancestry, e.g. `payments/gateway`.
    pub path: String,
    /// Last path segment.
    pub name: String,
    pub kind: BlockKind,
    pub spec: Specification,
    pub parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    /// Rules that apply to this block and its descendants.
    pub scoped_rules: Vec<Rule>,
    /// Sections borrowed from other blocks.
    pub same_as: Vec<SameAsReference>,
}

impl Block {
    /// Number of path separators; roots are depth 0.
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Path of the parent block derived from this block's own path.
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.scoped_rules = rules;
        self
    }
}

/// Arena holding every block of one hierarchy.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    blocks: Vec<Block>,
    by_path: HashMap<String, BlockId>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, spec)` pairs in any order.
    ///
    /// Entries are inserted shallowest first so parents always exist.
    pub fn from_specs(entries: Vec<(String, Specification)>) -> Result<Self> {
        let mut entries = entries;
        entries.sort_by_key(|(path, _)| path.matches('/').count());

        let mut tree = Self::new();
        for (path, spec) in entries {
            tree.insert(&path, spec)?;
        }
        Ok(tree)
    }

    /// Insert a block. Its parent (the path minus the last segment) must
    /// already be present.
    pub fn insert(&mut self, path: &str, spec: Specification) -> Result<BlockId> {
        let path = path.trim_matches('/');
        if path.is_empty() || path.split('/').any(|segment| segment.is_empty()) {
            return Err(Error::Validation(format!("Invalid block path: '{}'", path)));
        }
        if self.by_path.contains_key(path) {
            return Err(Error::DuplicateBlock(path.to_string()));
        }

        let parent = match path.rsplit_once('/') {
            Some((parent_path, _)) => Some(
                self.find(parent_path)
                    .ok_or_else(|| Error::BlockNotFound(parent_path.to_string()))?,
            ),
            None => None,
        };

        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block {
            path: path.to_string(),
            name,
            kind: if parent.is_none() {
                BlockKind::Root
            } else {
                BlockKind::Leaf
            },
            spec,
            parent,
            children: Vec::new(),
            scoped_rules: Vec::new(),
            same_as: Vec::new(),
        });
        self.by_path.insert(path.to_string(), id);

        if let Some(parent_id) = parent {
            let parent_block = &mut self.blocks[parent_id.0];
            parent_block.children.push(id);
            if parent_block.kind == BlockKind::Leaf {
                parent_block.kind = BlockKind::Component;
            }
        }

        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.0)
    }

    /// Look up a block id by its full path.
    pub fn find(&self, path: &str) -> Option<BlockId> {
        self.by_path.get(path.trim_matches('/')).copied()
    }

    pub fn block(&self, path: &str) -> Option<&Block> {
        self.find(path).and_then(|id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (BlockId(index), block))
    }

    /// First inserted root block, if any.
    pub fn root(&self) -> Option<&Block> {
        self.blocks.iter().find(|block| block.is_root())
    }

    pub fn parent(&self, id: BlockId) -> Option<&Block> {
        self.get(id)?.parent.and_then(|parent| self.get(parent))
    }

    pub fn children(&self, id: BlockId) -> Vec<&Block> {
        self.get(id)
            .map(|block| block.children.iter().filter_map(|c| self.get(*c)).collect())
            .unwrap_or_default()
    }

    /// Ancestors ordered from the root down to the direct parent.
    pub fn ancestors(&self, id: BlockId) -> Vec<&Block> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|block| block.parent);
        while let Some(parent_id) = current {
            match self.get(parent_id) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent.parent;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Blocks sharing this block's parent, excluding the block itself.
    pub fn siblings(&self, id: BlockId) -> Vec<&Block> {
        match self.get(id).and_then(|block| block.parent) {
            Some(parent) => self
                .children(parent)
                .into_iter()
                .filter(|sibling| self.find(&sibling.path) != Some(id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// All descendants, depth-first in child order.
    pub fn descendants(&self, id: BlockId) -> Vec<&Block> {
        let mut out = Vec::new();
        if let Some(block) = self.get(id) {
            for child in &block.children {
                if let Some(child_block) = self.get(*child) {
                    out.push(child_block);
                    out.extend(self.descendants(*child));
                }
            }
        }
        out
    }

    /// Block ids grouped by depth, shallowest group first. Within a group,
    /// blocks keep insertion order.
    pub fn levels(&self) -> Vec<Vec<BlockId>> {
        let mut levels: Vec<Vec<BlockId>> = Vec::new();
        for (id, block) in self.iter() {
            let depth = block.depth();
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(id);
        }
        levels.retain(|level| !level.is_empty());
        levels
    }
}
