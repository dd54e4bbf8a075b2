//! Filesystem watching and debounced reindex scheduling.
//!
//! One OS watcher is installed per canonical directory and fanned out to
//! every project mapped to it. Events bump a per-project timestamp in the
//! pending map; a fixed 5-second ticker fires a project's reindex once it
//! has been quiescent for the configured debounce window. An optional
//! minute-granular ticker drives periodic full rescans.

use anyhow::{anyhow, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::constants::{FSW_COALESCE_MS, SCHEDULER_TICK_SECS};
use crate::ignore::IgnoreMatcher;
use crate::index::EngineRegistry;
use crate::tracker::FileChanges;

/// Filesystem events the scheduler cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// File was created or modified.
    Modified(PathBuf),
    /// File was deleted.
    Deleted(PathBuf),
    /// File was renamed (from, to).
    Renamed(PathBuf, PathBuf),
}

/// Debounced watcher over one directory tree.
///
/// Wraps notify-debouncer-full for OS-event coalescing; eligibility and
/// ignore filtering happen at receipt so the pending map only ever sees
/// indexable paths.
pub struct FileWatcher {
    root: PathBuf,
    extensions: Vec<String>,
    matcher: IgnoreMatcher,
    debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    receiver: Option<Receiver<DebounceEventResult>>,
}

impl FileWatcher {
    pub fn new(root: PathBuf, config: &EngineConfig) -> Self {
        Self {
            root,
            extensions: config.extensions.clone(),
            matcher: IgnoreMatcher::new(),
            debouncer: None,
            receiver: None,
        }
    }

    /// Start collecting events.
    pub fn start(&mut self, coalesce_ms: u64) -> Result<()> {
        let (tx, rx) = channel();

        let mut debouncer = new_debouncer(Duration::from_millis(coalesce_ms), None, tx)
            .map_err(|e| anyhow!("Failed to create file watcher: {}", e))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| anyhow!("Failed to watch directory: {}", e))?;
        debouncer
            .cache()
            .add_root(&self.root, RecursiveMode::Recursive);

        self.receiver = Some(rx);
        self.debouncer = Some(debouncer);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.debouncer.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(ref mut debouncer) = self.debouncer {
            let _ = debouncer.watcher().unwatch(&self.root);
        }
        self.debouncer = None;
        self.receiver = None;
    }

    /// Eligible extension and not ignored: the same gate the tracker's
    /// enumeration applies, so the watcher and the index agree.
    fn is_watchable(&self, path: &Path) -> bool {
        let eligible = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                self.extensions.iter().any(|x| x == &lower)
            })
            .unwrap_or(false);
        eligible && !self.matcher.is_ignored(path, &self.root)
    }

    /// Drain pending events, deduplicated per path. Renames surface as
    /// delete(old) + create(new).
    pub fn poll_events(&self) -> Vec<FileEvent> {
        let Some(ref receiver) = self.receiver else {
            return vec![];
        };

        let mut events = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        while let Ok(result) = receiver.try_recv() {
            match result {
                Ok(debounced) => {
                    for event in debounced {
                        // A rename carries both paths on one event.
                        if matches!(
                            event.kind,
                            EventKind::Modify(notify::event::ModifyKind::Name(_))
                        ) && event.paths.len() == 2
                        {
                            let old = event.paths[0].clone();
                            let new = event.paths[1].clone();
                            if self.is_watchable(&old) && seen.insert(old.clone()) {
                                events.push(FileEvent::Deleted(old));
                            }
                            if self.is_watchable(&new) && seen.insert(new.clone()) {
                                events.push(FileEvent::Modified(new));
                            }
                            continue;
                        }

                        for path in &event.paths {
                            if !self.is_watchable(path) || !seen.insert(path.clone()) {
                                continue;
                            }
                            match event.kind {
                                EventKind::Create(_) | EventKind::Modify(_) => {
                                    if path.exists() {
                                        events.push(FileEvent::Modified(path.clone()));
                                    } else {
                                        events.push(FileEvent::Deleted(path.clone()));
                                    }
                                }
                                EventKind::Remove(_) => {
                                    events.push(FileEvent::Deleted(path.clone()));
                                }
                                _ => {}
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!("File watch error: {:?}", error);
                    }
                }
            }
        }

        events
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One project waiting out its debounce window.
struct PendingReindex {
    root: PathBuf,
    last_event: Instant,
    /// Paths reported by the watcher since the last fire. Empty means a
    /// full-mode change scan.
    changed: HashSet<PathBuf>,
    /// Changes precomputed by the startup verification, consumed on fire.
    precomputed: Option<FileChanges>,
    full: bool,
}

/// A watched directory and the projects sharing it.
struct DirectoryWatch {
    watcher: FileWatcher,
    projects: Vec<(String, PathBuf)>,
}

/// Debounced reindex scheduler across all watched projects.
pub struct WatcherDebouncer {
    registry: Arc<EngineRegistry>,
    debounce: Duration,
    rescan_minutes: Option<u64>,
    watches: Mutex<HashMap<String, DirectoryWatch>>,
    pending: Arc<Mutex<HashMap<String, PendingReindex>>>,
}

impl WatcherDebouncer {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        let config = registry.config();
        Self {
            debounce: Duration::from_secs(config.debounce_secs),
            rescan_minutes: config.rescan_minutes,
            registry,
            watches: Mutex::new(HashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Watch a project's directory. Projects mapping to the same canonical
    /// directory share one filesystem watcher; the startup verification
    /// runs only for the first registrant, and every sharer is queued when
    /// it finds changes.
    pub fn register(&self, project: &str, root: &Path) -> Result<()> {
        let canonical = std::fs::canonicalize(root)
            .unwrap_or_else(|_| root.to_path_buf())
            .to_string_lossy()
            .replace('\\', "/");

        let mut watches = self.watches.lock().expect("watch map poisoned");

        if let Some(existing) = watches.get_mut(&canonical) {
            if !existing.projects.iter().any(|(p, _)| p == project) {
                existing
                    .projects
                    .push((project.to_string(), root.to_path_buf()));
                info!("Project '{}' shares the watcher for {}", project, canonical);
            }
            // The directory was already verified at watch creation; queue
            // this project so it catches up on whatever was found.
            self.queue_now(project, root, None);
            return Ok(());
        }

        let mut watcher = FileWatcher::new(root.to_path_buf(), self.registry.config());
        if let Err(e) = watcher.start(FSW_COALESCE_MS) {
            error!("Watcher for '{}' failed to start: {}", project, e);
            return Err(e);
        }

        watches.insert(
            canonical.clone(),
            DirectoryWatch {
                watcher,
                projects: vec![(project.to_string(), root.to_path_buf())],
            },
        );
        drop(watches);

        // Startup verification, once per directory.
        match self.registry.tracker().get_changes(root, project, &[]) {
            Ok(changes) if changes.has_changes() => {
                info!(
                    "Startup verification for {}: {} changed path(s)",
                    canonical,
                    changes.total()
                );
                self.queue_now(project, root, Some(changes));
            }
            Ok(_) => debug!("Startup verification for {}: up to date", canonical),
            Err(e) => warn!("Startup verification for {} failed: {}", canonical, e),
        }

        info!("Watching {} for '{}'", canonical, project);
        Ok(())
    }

    /// Queue a project so it fires on the next scheduler tick.
    fn queue_now(&self, project: &str, root: &Path, precomputed: Option<FileChanges>) {
        let mut pending = self.pending.lock().expect("pending map poisoned");
        let fire_at = Instant::now() - self.debounce;
        let entry = pending
            .entry(project.to_string())
            .or_insert(PendingReindex {
                root: root.to_path_buf(),
                last_event: fire_at,
                changed: HashSet::new(),
                precomputed: None,
                full: false,
            });
        entry.last_event = fire_at;
        if precomputed.is_some() {
            entry.precomputed = precomputed;
        } else {
            entry.full = true;
        }
    }

    /// Drain watcher events into the pending map. Events for a shared
    /// directory fan out to every project on it; an event arriving while a
    /// project is queued resets its debounce window.
    fn poll_watchers(&self) {
        let watches = self.watches.lock().expect("watch map poisoned");
        let mut pending = self.pending.lock().expect("pending map poisoned");
        let now = Instant::now();

        for watch in watches.values() {
            let events = watch.watcher.poll_events();
            if events.is_empty() {
                continue;
            }
            debug!("Buffered {} filesystem event(s)", events.len());

            let mut paths: Vec<PathBuf> = Vec::new();
            for event in events {
                match event {
                    FileEvent::Modified(p) | FileEvent::Deleted(p) => paths.push(p),
                    FileEvent::Renamed(old, new) => {
                        paths.push(old);
                        paths.push(new);
                    }
                }
            }

            for (project, root) in &watch.projects {
                let entry = pending.entry(project.clone()).or_insert(PendingReindex {
                    root: root.clone(),
                    last_event: now,
                    changed: HashSet::new(),
                    precomputed: None,
                    full: false,
                });
                entry.last_event = now;
                entry.changed.extend(paths.iter().cloned());
            }
        }
    }

    /// Pop quiescent projects and spawn their reindexes outside the lock.
    fn fire_due(&self, cancel: &CancellationToken) {
        let due: Vec<(String, PendingReindex)> = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            let now = Instant::now();
            let ready: Vec<String> = pending
                .iter()
                .filter(|(_, p)| now.duration_since(p.last_event) >= self.debounce)
                .map(|(k, _)| k.clone())
                .collect();
            ready
                .into_iter()
                .filter_map(|k| pending.remove(&k).map(|p| (k, p)))
                .collect()
        };

        for (project, mut item) in due {
            let registry = self.registry.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let result = (|| -> anyhow::Result<()> {
                    let indexer = registry.get_or_create(&project, &item.root)?;
                    let precomputed = match item.precomputed.take() {
                        Some(changes) => Some(changes),
                        None if item.full || item.changed.is_empty() => None,
                        None => {
                            let subset: Vec<PathBuf> = item.changed.iter().cloned().collect();
                            Some(registry.tracker().get_changes(&item.root, &project, &subset)?)
                        }
                    };
                    indexer.index_directory(false, precomputed, &cancel)?;
                    Ok(())
                })();
                if let Err(e) = result {
                    error!("Debounced reindex of '{}' failed: {}", project, e);
                }
            });
        }
    }

    /// Queue a full-mode rescan for every watched project.
    fn queue_full_rescans(&self) {
        let watches = self.watches.lock().expect("watch map poisoned");
        let mut pending = self.pending.lock().expect("pending map poisoned");
        let fire_at = Instant::now() - self.debounce;
        for watch in watches.values() {
            for (project, root) in &watch.projects {
                let entry = pending.entry(project.clone()).or_insert(PendingReindex {
                    root: root.clone(),
                    last_event: fire_at,
                    changed: HashSet::new(),
                    precomputed: None,
                    full: false,
                });
                entry.last_event = fire_at;
                entry.full = true;
                entry.changed.clear();
            }
        }
        info!("Periodic rescan queued for all watched projects");
    }

    /// Run the scheduler until cancelled: a fixed 5-second tick drains
    /// events and fires due projects, and an optional minute-granular tick
    /// queues periodic full rescans. On shutdown all watchers are closed
    /// before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_secs(SCHEDULER_TICK_SECS));
        let rescan_period = self
            .rescan_minutes
            .map(|m| Duration::from_secs(m.max(1) * 60));
        let mut rescan =
            tokio::time::interval(rescan_period.unwrap_or(Duration::from_secs(3600)));
        // The first interval tick fires immediately; consume both.
        tick.tick().await;
        rescan.tick().await;

        info!(
            "Watcher scheduler running (debounce {} s, rescan {:?} min)",
            self.debounce.as_secs(),
            self.rescan_minutes
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Watcher scheduler shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.poll_watchers();
                    self.fire_due(&cancel);
                }
                _ = rescan.tick() => {
                    if rescan_period.is_some() {
                        self.queue_full_rescans();
                    }
                }
            }
        }

        // Close all watchers before the process exits; dropping a watch
        // stops the underlying notify instance.
        self.watches.lock().expect("watch map poisoned").clear();
    }

    /// Number of installed OS watchers (shared directories count once).
    pub fn watcher_count(&self) -> usize {
        self.watches.lock().expect("watch map poisoned").len()
    }

    /// Projects currently waiting out their debounce window.
    pub fn pending_projects(&self) -> Vec<String> {
        let pending = self.pending.lock().expect("pending map poisoned");
        let mut names: Vec<String> = pending.keys().cloned().collect();
        names.sort();
        names
    }
}
