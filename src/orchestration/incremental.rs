//! Incremental change tracking for specification documents.
//!
//! A document is split on numbered level-two headings (`## 3. Inputs`),
//! each section body is hashed, and successive snapshots are diffed so
//! that only work touched by a change has to be regenerated.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use crate::config::Config;
use crate::error::Result;
use crate::{sflog_debug, sflog_trace, sflog_warn};

/// Numbered top-level section heading.
static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^##\s+(\d+)\.\s+(.+)$").expect("section heading pattern is valid")
});

/// Implementation areas touched by a change to each numbered section.
const SECTION_TO_IMPLEMENTATION: &[(&str, &[&str])] = &[
    ("2. Overview", &["models", "interfaces"]),
    ("3. Inputs", &["models", "validators", "schemas"]),
    ("4. Outputs", &["models", "schemas"]),
    ("5. Dependencies", &["requirements", "imports"]),
    ("6. API Contract", &["routes", "handlers", "controllers"]),
    ("7. Test Cases", &["tests"]),
    ("8. Edge Cases", &["tests", "validators"]),
    ("9. Error Handling", &["exceptions", "handlers"]),
    ("10. Performance", &["caching", "optimization"]),
    ("11. Security", &["auth", "middleware", "validators"]),
    ("12. Implementation", &["services", "logic"]),
];

/// Content digest: SHA-256, first 16 hex characters.
pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Split a document into `"N. Title" -> body` pairs.
///
/// A body runs from the end of its heading line to the next heading or the
/// end of the document, trimmed. Text before the first heading is ignored.
pub fn parse_sections(doc: &str) -> BTreeMap<String, String> {
    let headings: Vec<_> = SECTION_RE.captures_iter(doc).collect();
    let mut sections = BTreeMap::new();

    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(number), Some(title)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(doc.len());
        let body = doc[whole.end()..end].trim();
        sections.insert(
            format!("{}. {}", number.as_str(), title.as_str().trim()),
            body.to_string(),
        );
    }

    sections
}

/// Ordering key for section ids: numeric prefix first, then text.
fn section_order(id: &str) -> (u32, &str) {
    let number = id
        .split_once('.')
        .and_then(|(n, _)| n.trim().parse().ok())
        .unwrap_or(u32::MAX);
    (number, id)
}

fn sort_sections(ids: &mut [String]) {
    ids.sort_by(|a, b| section_order(a).cmp(&section_order(b)));
}

/// Hash of one section at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHash {
    pub section_name: String,
    pub content_hash: String,
    pub last_modified: DateTime<Utc>,
}

/// Hashed state of a specification document at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub spec_name: String,
    #[serde(default)]
    pub spec_path: String,
    /// Digest over the section hashes; changes iff a section hash changes.
    pub overall_hash: String,
    #[serde(default)]
    pub section_hashes: BTreeMap<String, SectionHash>,
    #[serde(default)]
    pub generated_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn hash_of(&self, section: &str) -> Option<&str> {
        self.section_hashes
            .get(section)
            .map(|h| h.content_hash.as_str())
    }
}

/// Take a snapshot of `doc`.
pub fn snapshot(spec_name: &str, doc: &str) -> Snapshot {
    snapshot_with_path(spec_name, doc, "")
}

pub fn snapshot_with_path(spec_name: &str, doc: &str, spec_path: &str) -> Snapshot {
    let now = Utc::now();
    let section_hashes: BTreeMap<String, SectionHash> = parse_sections(doc)
        .into_iter()
        .map(|(name, body)| {
            let hash = SectionHash {
                section_name: name.clone(),
                content_hash: compute_hash(&body),
                last_modified: now,
            };
            (name, hash)
        })
        .collect();

    let combined: String = section_hashes
        .iter()
        .map(|(name, hash)| format!("{}={}\n", name, hash.content_hash))
        .collect();

    sflog_trace!(
        "incremental: snapshot {} with {} sections",
        spec_name,
        section_hashes.len()
    );

    Snapshot {
        spec_name: spec_name.to_string(),
        spec_path: spec_path.to_string(),
        overall_hash: compute_hash(&combined),
        section_hashes,
        generated_files: Vec::new(),
        timestamp: now,
    }
}

/// Sections that differ between two snapshots. The three lists are disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }

    /// Added and modified sections; removed ones have nothing to regenerate.
    pub fn affected_sections(&self) -> Vec<String> {
        self.added.iter().chain(&self.modified).cloned().collect()
    }
}

/// Compare two snapshots section by section.
pub fn diff(old: &Snapshot, new: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (name, hash) in &new.section_hashes {
        match old.hash_of(name) {
            None => changes.added.push(name.clone()),
            Some(previous) if previous != hash.content_hash => changes.modified.push(name.clone()),
            Some(_) => {}
        }
    }
    changes.removed = old
        .section_hashes
        .keys()
        .filter(|name| !new.section_hashes.contains_key(*name))
        .cloned()
        .collect();

    sort_sections(&mut changes.added);
    sort_sections(&mut changes.modified);
    sort_sections(&mut changes.removed);
    changes
}

/// Implementation areas touched by a change set, sorted and de-duplicated.
pub fn map_changes_to_implementation_areas(changes: &ChangeSet) -> Vec<String> {
    let table: HashMap<&str, &[&str]> = SECTION_TO_IMPLEMENTATION.iter().copied().collect();
    let areas: BTreeSet<&str> = changes
        .affected_sections()
        .iter()
        .filter_map(|section| table.get(section.as_str()))
        .flat_map(|areas| areas.iter().copied())
        .collect();
    areas.into_iter().map(String::from).collect()
}

/// Persistence for snapshots, keyed by specification name.
pub trait SnapshotStore: Send + Sync {
    fn load(&self, spec_name: &str) -> Result<Option<Snapshot>>;
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    snapshots: BTreeMap<String, Snapshot>,
}

/// Single merged JSON file: `{ "snapshots": { name: snapshot } }`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the configured location for `project_root`.
    pub fn for_project(config: &Config, project_root: &Path) -> Self {
        Self::new(config.snapshot_path(project_root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SnapshotFile> {
        if !self.path.exists() {
            return Ok(SnapshotFile::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, spec_name: &str) -> Result<Option<Snapshot>> {
        Ok(self.read()?.snapshots.remove(spec_name))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut file = match self.read() {
            Ok(file) => file,
            Err(e) => {
                sflog_warn!(
                    "incremental: unreadable snapshot store {}, starting fresh: {}",
                    self.path.display(),
                    e
                );
                SnapshotFile::default()
            }
        };
        file.snapshots
            .insert(snapshot.spec_name.clone(), snapshot.clone());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

/// In-process store, mostly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, spec_name: &str) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(snapshots.get(spec_name).cloned())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.insert(snapshot.spec_name.clone(), snapshot.clone());
        Ok(())
    }
}

/// What changed since the last recorded snapshot of a specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalContext {
    pub spec_name: String,
    /// False on a first build: treat everything as changed.
    pub is_incremental: bool,
    pub up_to_date: bool,
    pub changes: Option<ChangeSet>,
    pub affected_sections: Vec<String>,
    pub implementation_areas: Vec<String>,
    pub previously_generated: Vec<String>,
    pub new_snapshot: Snapshot,
    pub old_snapshot: Option<Snapshot>,
}

/// Snapshot bookkeeping on top of a [`SnapshotStore`].
#[derive(Clone)]
pub struct IncrementalTracker {
    store: Arc<dyn SnapshotStore>,
}

impl IncrementalTracker {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn for_project(config: &Config, project_root: &Path) -> Self {
        Self::new(Arc::new(FileSnapshotStore::for_project(config, project_root)))
    }

    pub fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        sflog_debug!(
            "incremental: saving snapshot {} ({})",
            snapshot.spec_name,
            snapshot.overall_hash
        );
        self.store.save(snapshot)
    }

    pub fn load(&self, spec_name: &str) -> Result<Option<Snapshot>> {
        self.store.load(spec_name)
    }

    /// Compare `doc` against the stored snapshot. Nothing is persisted.
    pub fn incremental_context(
        &self,
        spec_name: &str,
        doc: &str,
        spec_path: &str,
    ) -> Result<IncrementalContext> {
        let new_snapshot = snapshot_with_path(spec_name, doc, spec_path);
        let old_snapshot = self.load(spec_name)?;

        let mut context = IncrementalContext {
            spec_name: spec_name.to_string(),
            is_incremental: old_snapshot.is_some(),
            up_to_date: false,
            changes: None,
            affected_sections: Vec::new(),
            implementation_areas: Vec::new(),
            previously_generated: Vec::new(),
            new_snapshot,
            old_snapshot: None,
        };

        if let Some(old) = old_snapshot {
            let changes = diff(&old, &context.new_snapshot);
            context.up_to_date = !changes.has_changes();
            context.affected_sections = changes.affected_sections();
            context.implementation_areas = map_changes_to_implementation_areas(&changes);
            context.previously_generated = old.generated_files.clone();
            context.changes = Some(changes);
            context.old_snapshot = Some(old);
        }

        Ok(context)
    }

    /// Attach generated file paths to the stored snapshot. Returns false
    /// when no snapshot exists for `spec_name`.
    pub fn record_generation(&self, spec_name: &str, files: Vec<String>) -> Result<bool> {
        let Some(mut snapshot) = self.load(spec_name)? else {
            return Ok(false);
        };
        snapshot.generated_files = files;
        snapshot.timestamp = Utc::now();
        self.persist(&snapshot)?;
        Ok(true)
    }
}

impl std::fmt::Debug for IncrementalTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalTracker").finish_non_exhaustive()
    }
}
