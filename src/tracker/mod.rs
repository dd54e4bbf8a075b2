//! Change detection against a persisted file-hash snapshot.
//!
//! Each project keeps an in-memory `path → content-hash` map, loaded once
//! from its state file and written back only on explicit save. Diffing the
//! current working tree against that map yields the `{added, modified,
//! removed}` sets that drive a reindex cycle.

pub mod hash;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::ignore::IgnoreMatcher;

/// The change set for one project, pairwise disjoint by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl FileChanges {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// On-disk shape of a file-hash snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    directory: String,
    #[serde(default)]
    project: Option<String>,
    saved_at: chrono::DateTime<chrono::Utc>,
    files: HashMap<String, String>,
}

/// Hash-based change tracker shared across projects.
///
/// The cache is a map of maps: one inner `path → hash` map per project key,
/// so concurrent projects only contend on the outer shard when a project is
/// first inserted.
pub struct ChangeTracker {
    state_dir: PathBuf,
    extensions: Vec<String>,
    parallelism: usize,
    matcher: IgnoreMatcher,
    cache: DashMap<String, HashMap<String, String>>,
}

impl ChangeTracker {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        Ok(Self::with_state_dir(config, crate::constants::state_dir()?))
    }

    /// Construct with an explicit state directory (used by tests and by
    /// hosts that relocate the app-data directory).
    pub fn with_state_dir(config: &EngineConfig, state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            extensions: config.extensions.clone(),
            parallelism: config.effective_parallelism(),
            matcher: IgnoreMatcher::new(),
            cache: DashMap::new(),
        }
    }

    /// Enumerate all files under `root` with an eligible extension that pass
    /// the ignore rules. Also used by force reindexes, which treat the full
    /// enumeration as `added`.
    pub fn enumerate_eligible(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.is_eligible(path))
            .filter(|path| !self.matcher.is_ignored(path, root))
            .collect();
        files.sort();
        files
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                self.extensions.iter().any(|x| x == &lower)
            })
            .unwrap_or(false)
    }

    /// Compute `{added, modified, removed}` for a project.
    ///
    /// With `changed_files` empty the full tree is enumerated and hashed;
    /// otherwise only the given subset is re-hashed and all other snapshot
    /// entries are carried over (dropping entries whose files disappeared).
    pub fn get_changes(
        &self,
        root: &Path,
        project: &str,
        changed_files: &[PathBuf],
    ) -> anyhow::Result<FileChanges> {
        let key = self.cache_key(root, project);
        let prev = self.load_cached_snapshot(&key, root, project);

        let full_mode = changed_files.is_empty();
        let current: HashMap<String, String> = if full_mode {
            let files = self.enumerate_eligible(root);
            hash::hash_files_parallel(&files, self.parallelism)
                .into_iter()
                .map(|(p, h)| (path_str(&p), h))
                .collect()
        } else {
            let subset: HashSet<String> = changed_files.iter().map(|p| path_str(p)).collect();

            // Carry over everything outside the subset that still exists.
            let mut current: HashMap<String, String> = prev
                .iter()
                .filter(|(p, _)| !subset.contains(*p) && Path::new(p).exists())
                .map(|(p, h)| (p.clone(), h.clone()))
                .collect();

            // Re-hash the subset; files that vanished simply stay absent.
            let to_hash: Vec<PathBuf> = changed_files
                .iter()
                .filter(|p| p.exists())
                .filter(|p| self.is_eligible(p) && !self.matcher.is_ignored(p, root))
                .cloned()
                .collect();
            for (p, h) in hash::hash_files_parallel(&to_hash, self.parallelism) {
                current.insert(path_str(&p), h);
            }
            current
        };

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut removed = Vec::new();

        for (path, hash) in &current {
            match prev.get(path) {
                None => added.push(PathBuf::from(path)),
                Some(old) if old != hash => modified.push(PathBuf::from(path)),
                Some(_) => {}
            }
        }
        for path in prev.keys() {
            if !current.contains_key(path) {
                removed.push(PathBuf::from(path));
            }
        }

        added.sort();
        modified.sort();
        removed.sort();

        let changes = FileChanges {
            added,
            modified,
            removed,
        };

        // Cache-update policy: apply the diff on changes; on an empty diff in
        // full mode, reconcile the whole map so external tampering with the
        // state file cannot leave the cache stale.
        if changes.has_changes() {
            let mut entry = self.cache.entry(key).or_default();
            for path in &changes.removed {
                entry.remove(&path_str(path));
            }
            for path in changes.added.iter().chain(changes.modified.iter()) {
                let p = path_str(path);
                if let Some(h) = current.get(&p) {
                    entry.insert(p, h.clone());
                }
            }
        } else if full_mode {
            self.cache.insert(key, current);
        }

        debug!(
            "Changes for {}: +{} ~{} -{}",
            project,
            changes.added.len(),
            changes.modified.len(),
            changes.removed.len()
        );

        Ok(changes)
    }

    /// Serialize the in-memory snapshot for one project to its state file.
    pub fn save_state(&self, root: &Path, project: &str) -> anyhow::Result<()> {
        let key = self.cache_key(root, project);
        let files = self
            .cache
            .get(&key)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let snapshot = SnapshotFile {
            directory: path_str(root),
            project: Some(project.to_string()),
            saved_at: chrono::Utc::now(),
            files,
        };

        std::fs::create_dir_all(&self.state_dir)?;
        let path = self.state_file_path(root, project);
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&path, json)?;
        debug!("Saved snapshot to {}", path.display());
        Ok(())
    }

    /// Wipe the state directory entirely.
    pub fn clear_state(&self) -> anyhow::Result<()> {
        if self.state_dir.exists() {
            std::fs::remove_dir_all(&self.state_dir)?;
        }
        std::fs::create_dir_all(&self.state_dir)?;
        info!("Cleared snapshot state directory");
        Ok(())
    }

    /// Drop the in-memory snapshot for one project, or all of them.
    pub fn clear_cache(&self, root: Option<&Path>, project: Option<&str>) {
        match (root, project) {
            (Some(r), Some(p)) => {
                self.cache.remove(&self.cache_key(r, p));
            }
            _ => self.cache.clear(),
        }
    }

    /// Remove one project's snapshot both in memory and on disk. Used by
    /// force reindexes, which must start from an empty baseline.
    pub fn reset_project(&self, root: &Path, project: &str) -> anyhow::Result<()> {
        self.cache.remove(&self.cache_key(root, project));
        let path = self.state_file_path(root, project);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Snapshot keys currently tracked for a project (test and stats hook).
    pub fn tracked_paths(&self, root: &Path, project: &str) -> Vec<String> {
        self.cache
            .get(&self.cache_key(root, project))
            .map(|e| {
                let mut v: Vec<String> = e.keys().cloned().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }

    fn cache_key(&self, root: &Path, project: &str) -> String {
        hash::state_key(&path_str(root), Some(project))
    }

    /// `<state-dir>/state_<project>_<hash>.json`
    fn state_file_path(&self, root: &Path, project: &str) -> PathBuf {
        let key = hash::state_key(&path_str(root), Some(project));
        let sanitized = crate::constants::sanitize_project_name(project);
        self.state_dir
            .join(format!("state_{}_{}.json", sanitized, key))
    }

    /// Populate the in-memory cache from disk on first access.
    fn load_cached_snapshot(
        &self,
        key: &str,
        root: &Path,
        project: &str,
    ) -> HashMap<String, String> {
        if let Some(entry) = self.cache.get(key) {
            return entry.value().clone();
        }

        let path = self.state_file_path(root, project);
        let files = match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<SnapshotFile>(&json) {
                Ok(snapshot) => snapshot.files,
                Err(e) => {
                    warn!(
                        "Corrupt snapshot {} ({}), starting from empty",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        self.cache.insert(key.to_string(), files.clone());
        files
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn tracker(state: &Path) -> ChangeTracker {
        ChangeTracker::with_state_dir(&EngineConfig::default(), state.to_path_buf())
    }

    #[test]
    fn test_full_mode_detects_adds() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(root.path().join("a.cs"), "class A {}").unwrap();
        fs::write(root.path().join("b.cs"), "class B {}").unwrap();
        fs::write(root.path().join("notes.md"), "not eligible").unwrap();

        let t = tracker(state.path());
        let changes = t.get_changes(root.path(), "proj", &[]).unwrap();

        assert_eq!(changes.added.len(), 2);
        assert!(changes.modified.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_second_pass_is_empty() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(root.path().join("a.cs"), "class A {}").unwrap();

        let t = tracker(state.path());
        let first = t.get_changes(root.path(), "proj", &[]).unwrap();
        assert!(first.has_changes());

        let second = t.get_changes(root.path(), "proj", &[]).unwrap();
        assert!(!second.has_changes(), "idempotent: {:?}", second);
    }

    #[test]
    fn test_modification_and_removal() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        let a = root.path().join("a.cs");
        let b = root.path().join("b.cs");
        fs::write(&a, "class A {}").unwrap();
        fs::write(&b, "class B {}").unwrap();

        let t = tracker(state.path());
        t.get_changes(root.path(), "proj", &[]).unwrap();

        fs::write(&a, "class A { int X; }").unwrap();
        fs::remove_file(&b).unwrap();

        let changes = t.get_changes(root.path(), "proj", &[]).unwrap();
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.removed.len(), 1);
        assert!(changes.added.is_empty());
    }

    #[test]
    fn test_incremental_mode_only_hashes_subset() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        let a = root.path().join("a.cs");
        let b = root.path().join("b.cs");
        fs::write(&a, "class A {}").unwrap();
        fs::write(&b, "class B {}").unwrap();

        let t = tracker(state.path());
        t.get_changes(root.path(), "proj", &[]).unwrap();

        // Touch only a.cs and report only it to the tracker.
        fs::write(&a, "class A { void M() {} }").unwrap();
        let changes = t
            .get_changes(root.path(), "proj", &[a.clone()])
            .unwrap();

        assert_eq!(changes.modified, vec![a]);
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_incremental_mode_detects_deleted_subset_file() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        let a = root.path().join("a.cs");
        fs::write(&a, "class A {}").unwrap();

        let t = tracker(state.path());
        t.get_changes(root.path(), "proj", &[]).unwrap();

        fs::remove_file(&a).unwrap();
        let changes = t
            .get_changes(root.path(), "proj", &[a.clone()])
            .unwrap();

        assert_eq!(changes.removed.len(), 1);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(root.path().join("a.cs"), "class A {}").unwrap();

        {
            let t = tracker(state.path());
            t.get_changes(root.path(), "proj", &[]).unwrap();
            t.save_state(root.path(), "proj").unwrap();
        }

        // Fresh tracker loads the snapshot from disk: no changes reported.
        let t2 = tracker(state.path());
        let changes = t2.get_changes(root.path(), "proj", &[]).unwrap();
        assert!(!changes.has_changes());
    }

    #[test]
    fn test_clear_cache_forces_reload_from_disk() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(root.path().join("a.cs"), "class A {}").unwrap();

        let t = tracker(state.path());
        t.get_changes(root.path(), "proj", &[]).unwrap();
        t.save_state(root.path(), "proj").unwrap();

        t.clear_cache(Some(root.path()), Some("proj"));
        let changes = t.get_changes(root.path(), "proj", &[]).unwrap();
        assert!(!changes.has_changes());
    }

    #[test]
    fn test_projects_do_not_share_snapshots() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::write(root.path().join("a.cs"), "class A {}").unwrap();

        let t = tracker(state.path());
        let x = t.get_changes(root.path(), "projX", &[]).unwrap();
        let y = t.get_changes(root.path(), "projY", &[]).unwrap();

        // Same directory, separate baselines: both see the add.
        assert_eq!(x.added.len(), 1);
        assert_eq!(y.added.len(), 1);
    }

    #[test]
    fn test_enumeration_applies_ignore_rules() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::write(root.path().join("bin/gen.cs"), "class G {}").unwrap();
        fs::write(root.path().join("a.cs"), "class A {}").unwrap();

        let t = tracker(state.path());
        let files = t.enumerate_eligible(root.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.cs"));
    }
}
