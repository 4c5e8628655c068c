//! Workflow definition loading and indexed lookup.
//!
//! Definitions are YAML files in a source directory, validated eagerly at
//! load into immutable [`WorkflowDefinition`] structs. Loading never stops
//! at the first bad file: every malformed definition is collected into one
//! aggregated [`VigilError::Definition`] report.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use vigil_shared::{Result, VigilError, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate every `*.yaml`/`*.yml` definition in `dir`.
///
/// Returns all definitions sorted by id, or a `Definition` error listing
/// every problem found (parse failures, empty trigger/deliverable lists,
/// duplicate ids).
pub fn load_all(dir: &Path) -> Result<Vec<WorkflowDefinition>> {
    let entries = std::fs::read_dir(dir).map_err(|e| VigilError::io(dir, e))?;

    let mut definitions: Vec<WorkflowDefinition> = Vec::new();
    let mut problems: Vec<String> = Vec::new();
    let mut seen_ids: BTreeSet<String> = BTreeSet::new();

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                problems.push(format!("{file}: unreadable: {e}"));
                continue;
            }
        };

        let def: WorkflowDefinition = match serde_yaml::from_str(&content) {
            Ok(d) => d,
            Err(e) => {
                problems.push(format!("{file}: {e}"));
                continue;
            }
        };

        if def.trigger_labels.is_empty() {
            problems.push(format!("{file}: trigger_labels must not be empty"));
        }
        if def.deliverables.is_empty() {
            problems.push(format!("{file}: deliverables must not be empty"));
        }
        if !seen_ids.insert(def.id.clone()) {
            problems.push(format!("{file}: duplicate id '{}'", def.id));
        }

        definitions.push(def);
    }

    if !problems.is_empty() {
        return Err(VigilError::Definition { problems });
    }

    definitions.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(count = definitions.len(), dir = %dir.display(), "workflow definitions loaded");
    Ok(definitions)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable index over one generation of loaded definitions.
struct RegistryIndex {
    definitions: Vec<Arc<WorkflowDefinition>>,
    by_id: HashMap<String, usize>,
    /// trigger label -> definition indices, built once at load time.
    by_trigger: HashMap<String, Vec<usize>>,
}

impl RegistryIndex {
    fn build(definitions: Vec<WorkflowDefinition>) -> Self {
        let definitions: Vec<Arc<WorkflowDefinition>> =
            definitions.into_iter().map(Arc::new).collect();

        let mut by_id = HashMap::new();
        let mut by_trigger: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, def) in definitions.iter().enumerate() {
            by_id.insert(def.id.clone(), i);
            for label in &def.trigger_labels {
                by_trigger.entry(label.clone()).or_default().push(i);
            }
        }

        Self {
            definitions,
            by_id,
            by_trigger,
        }
    }
}

/// Owns all loaded [`WorkflowDefinition`]s, indexed by trigger label.
///
/// Loaded once per process lifetime and cached; invalidated only by an
/// explicit [`reload`](Self::reload), which swaps the whole index in one
/// step so concurrent matchers never observe a half-updated registry.
pub struct WorkflowRegistry {
    index: RwLock<Arc<RegistryIndex>>,
}

impl WorkflowRegistry {
    /// Load definitions from `dir` and build the trigger index.
    pub fn load(dir: &Path) -> Result<Self> {
        let definitions = load_all(dir)?;
        info!(count = definitions.len(), "workflow registry loaded");
        Ok(Self {
            index: RwLock::new(Arc::new(RegistryIndex::build(definitions))),
        })
    }

    /// Build a registry directly from definitions (tests, embedded use).
    pub fn from_definitions(definitions: Vec<WorkflowDefinition>) -> Self {
        Self {
            index: RwLock::new(Arc::new(RegistryIndex::build(definitions))),
        }
    }

    /// Re-read the source directory and atomically swap the index.
    /// On error the previous generation stays in place.
    pub fn reload(&self, dir: &Path) -> Result<()> {
        let definitions = load_all(dir)?;
        let next = Arc::new(RegistryIndex::build(definitions));
        let mut guard = self.write_lock();
        *guard = next;
        info!("workflow registry reloaded");
        Ok(())
    }

    /// Workflows whose `trigger_labels` contain `label`. O(1) index lookup.
    pub fn find_by_trigger_label(&self, label: &str) -> Vec<Arc<WorkflowDefinition>> {
        let index = self.snapshot();
        index
            .by_trigger
            .get(label)
            .map(|ids| ids.iter().map(|&i| index.definitions[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Look up one workflow by id.
    pub fn find_by_id(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        let index = self.snapshot();
        index.by_id.get(id).map(|&i| index.definitions[i].clone())
    }

    /// All loaded definitions, sorted by id.
    pub fn all(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.snapshot().definitions.clone()
    }

    /// The universe of known trigger labels (used for clarify suggestions).
    pub fn trigger_labels(&self) -> BTreeSet<String> {
        self.snapshot().by_trigger.keys().cloned().collect()
    }

    fn snapshot(&self) -> Arc<RegistryIndex> {
        self.index
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Arc<RegistryIndex>> {
        self.index.write().unwrap_or_else(|p| p.into_inner())
    }
}
