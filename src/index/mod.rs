//! Per-project indexing orchestration.
//!
//! The `Indexer` drives one project's reindex cycle: change detection,
//! deletions, chunking, cache-aware embedding, persistence, and the
//! in-memory vector index. Instances live behind the process-wide
//! `EngineRegistry`, created lazily per project name.

use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::config::{EngineConfig, Precision};
use crate::constants::{self, check_shutdown};
use crate::embed::{EmbeddingCache, EmbeddingService};
use crate::error::EngineError;
use crate::store::{meta_keys, ChunkRecord, ChunkStore};
use crate::tracker::{ChangeTracker, FileChanges};
use crate::vector::{simd, SearchResult, VectorEntry, VectorIndex};

/// Counters for one reindex cycle.
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_removed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub chunks_dropped: usize,
    pub cache_hits: usize,
    pub batches_sent: usize,
    pub elapsed_ms: u128,
}

/// Point-in-time view of a project's index.
#[derive(Debug, Clone)]
pub struct IndexStatistics {
    pub project: String,
    pub chunk_count: usize,
    pub file_count: usize,
    pub live_vectors: usize,
    pub deleted_slots: usize,
    pub dimension: usize,
    pub precision: Precision,
    pub db_size_bytes: u64,
    pub cache_entries: u64,
}

/// Search options beyond query and k.
#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    /// Accept only these kind tags (exact match), when non-empty.
    pub chunk_types: Vec<String>,
    /// Accept only paths containing this substring.
    pub path_contains: Option<String>,
}

/// One project's indexing engine.
pub struct Indexer {
    project: String,
    root: PathBuf,
    config: EngineConfig,
    store: ChunkStore,
    index: RwLock<VectorIndex>,
    tracker: Arc<ChangeTracker>,
    embedder: Arc<EmbeddingService>,
    chunker: Chunker,
}

impl Indexer {
    /// Open a project's store and rebuild its in-memory index.
    pub fn open(
        project: &str,
        root: &Path,
        config: &EngineConfig,
        tracker: Arc<ChangeTracker>,
        embedder: Arc<EmbeddingService>,
        db_path: &Path,
    ) -> anyhow::Result<Self> {
        let store = ChunkStore::open(db_path)?;

        // A store written with a different model setup cannot be loaded into
        // this index; the recommended recovery is a force reindex.
        if let Some(stored) = store.get_metadata(meta_keys::DIMENSION)? {
            if stored.parse::<usize>().ok() != Some(embedder.dimension()) {
                return Err(EngineError::invariant(format!(
                    "store for '{}' was built with dimension {}, engine is configured for {}; \
                     run a force reindex",
                    project,
                    stored,
                    embedder.dimension()
                ))
                .into());
            }
        }

        let index = store.load_all(
            embedder.dimension(),
            embedder.precision(),
            config.effective_parallelism(),
        )?;
        info!(
            "Opened project '{}' with {} vectors",
            project,
            index.live_count()
        );

        Ok(Self {
            project: project.to_string(),
            root: root.to_path_buf(),
            config: config.clone(),
            store,
            index: RwLock::new(index),
            tracker,
            embedder,
            chunker: Chunker::new(config.file_path_context),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one reindex cycle.
    ///
    /// Deletions happen before insertions; every index mutation takes the
    /// write lock per operation, so a concurrent search sees the pre-cycle
    /// state or a consistent intermediate one, never a half-written slot.
    pub fn index_directory(
        &self,
        force: bool,
        precomputed: Option<FileChanges>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<IndexStats> {
        let start = Instant::now();
        let mut stats = IndexStats::default();

        let changes = if force {
            info!("Force reindex for '{}': clearing store and index", self.project);
            self.store.clear()?;
            self.index.write().expect("index lock poisoned").clear();
            self.tracker.reset_project(&self.root, &self.project)?;
            // Everything eligible counts as added; the tracker rebuilds its
            // baseline from the fresh hash pass below.
            self.tracker.get_changes(&self.root, &self.project, &[])?
        } else {
            match precomputed {
                Some(c) => c,
                None => self.tracker.get_changes(&self.root, &self.project, &[])?,
            }
        };

        if !changes.has_changes() {
            debug!("No changes for '{}'", self.project);
            return Ok(stats);
        }

        let result = self.apply_changes(&changes, &mut stats, cancel);
        if let Err(e) = result {
            // The in-memory snapshot was advanced by get_changes; drop it so
            // the next cycle re-reads the last persisted state and retries
            // the same work.
            self.tracker.clear_cache(Some(&self.root), Some(&self.project));
            return Err(e);
        }

        self.tracker.save_state(&self.root, &self.project)?;
        stats.elapsed_ms = start.elapsed().as_millis();
        info!(
            "Reindexed '{}': +{} files, -{} files, {} chunks ({} cache hits, {} skipped) in {} ms",
            self.project,
            stats.files_indexed,
            stats.files_removed,
            stats.chunks_created,
            stats.cache_hits,
            stats.files_skipped,
            stats.elapsed_ms
        );
        Ok(stats)
    }

    fn apply_changes(
        &self,
        changes: &FileChanges,
        stats: &mut IndexStats,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        // Step 1: deletions for removed and modified paths.
        for path in changes.removed.iter().chain(changes.modified.iter()) {
            let path_str = path.to_string_lossy().replace('\\', "/");
            self.store.delete_by_path(&path_str)?;
            self.index
                .write()
                .expect("index lock poisoned")
                .remove_by_path(&path_str);
        }
        stats.files_removed = changes.removed.len();

        // Step 2: chunk added and modified files on the worker pool.
        let to_chunk: Vec<&PathBuf> = changes
            .added
            .iter()
            .chain(changes.modified.iter())
            .collect();
        let chunker = &self.chunker;
        let chunk_one = |path: &&PathBuf| {
            if check_shutdown(cancel) {
                return (path.to_path_buf(), Ok(Vec::new()));
            }
            (path.to_path_buf(), chunker.chunk_file(path))
        };
        let chunked: Vec<(PathBuf, Result<Vec<Chunk>, EngineError>)> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.effective_parallelism())
                .build()
            {
                Ok(pool) => pool.install(|| to_chunk.par_iter().map(chunk_one).collect()),
                Err(_) => to_chunk.par_iter().map(chunk_one).collect(),
            };

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut indexed_files = BTreeSet::new();
        for (path, result) in chunked {
            match result {
                Ok(file_chunks) => {
                    if !file_chunks.is_empty() {
                        indexed_files.insert(path);
                    }
                    chunks.extend(file_chunks);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    stats.files_skipped += 1;
                }
            }
        }
        stats.chunks_created = chunks.len();

        // Unwind without persisting anything for this cycle; the caller
        // restores the tracker baseline so the next run redoes the work.
        if check_shutdown(cancel) {
            anyhow::bail!("reindex of '{}' cancelled", self.project);
        }

        if chunks.is_empty() {
            stats.files_indexed = indexed_files.len();
            return Ok(());
        }

        // Step 3: embeddings, persistent cache first.
        let outcome = self.embedder.embed_chunks(&self.project, &chunks);
        stats.cache_hits = outcome.cache_hits;
        stats.batches_sent = outcome.batches_sent;
        stats.chunks_dropped = outcome.dropped;

        let precision = self.embedder.precision();
        let mut records: Vec<ChunkRecord> = Vec::with_capacity(chunks.len());
        let mut dropped_files = BTreeSet::new();
        for (chunk, blob) in chunks.iter().zip(outcome.blobs.into_iter()) {
            match blob {
                Some(blob) => {
                    records.push(ChunkRecord::from_chunk(chunk, blob, precision));
                }
                None => {
                    dropped_files.insert(chunk.path.clone());
                }
            }
        }
        stats.files_skipped += dropped_files.len();

        // Step 4: persist, then append to the live index.
        self.store.save_chunks(&records)?;
        let entries: Vec<VectorEntry> = records
            .iter()
            .map(|r| VectorEntry {
                id: r.id.clone(),
                path: r.file_path.clone(),
                start_line: r.start_line,
                end_line: r.end_line,
                text: r.content.clone(),
                embedding: r.embedding.clone(),
                precision: r.precision,
                kind_tag: r.chunk_type.clone(),
                modified_at: r.indexed_at,
            })
            .collect();
        self.index
            .write()
            .expect("index lock poisoned")
            .append_batch(entries)?;

        self.write_metadata()?;
        stats.files_indexed = indexed_files.len();
        Ok(())
    }

    fn write_metadata(&self) -> Result<(), EngineError> {
        self.store
            .save_metadata(meta_keys::DIMENSION, &self.embedder.dimension().to_string())?;
        self.store
            .save_metadata(meta_keys::PRECISION, self.embedder.precision().as_str())?;
        self.store.save_metadata(
            meta_keys::CPU_CAPABILITIES,
            simd::kernel_name(self.embedder.precision()),
        )?;
        self.store.save_metadata(
            meta_keys::PROJECT_DIRECTORY,
            &self.root.to_string_lossy().replace('\\', "/"),
        )?;
        Ok(())
    }

    /// Top-K search, optionally expanding the query with synonym groups.
    pub fn search(&self, query: &str, k: usize, expand: bool) -> anyhow::Result<Vec<SearchResult>> {
        self.search_with_filters(query, k, &SearchFilter::default(), expand)
    }

    pub fn search_with_filters(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        expand: bool,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let effective = if expand {
            expand_query(query)
        } else {
            query.to_string()
        };

        let blob = self.embedder.embed_query(&effective)?;
        let vector = match self.embedder.precision() {
            Precision::Single => simd::blob_to_f32(&blob),
            Precision::Half => simd::blob_to_f16(&blob)
                .into_iter()
                .map(|h| h.to_f32())
                .collect(),
        };

        let index = self.index.read().expect("index lock poisoned");
        let results = index.search_filtered(&vector, k, |entry| {
            (filter.chunk_types.is_empty() || filter.chunk_types.contains(&entry.kind_tag))
                && filter
                    .path_contains
                    .as_deref()
                    .map(|p| entry.path.contains(p))
                    .unwrap_or(true)
        })?;
        Ok(results)
    }

    /// Discard the indexed state. The embedding cache is deliberately left
    /// intact so the next reindex reuses unchanged content.
    pub fn clear(&self) -> anyhow::Result<()> {
        self.store.clear()?;
        self.index.write().expect("index lock poisoned").clear();
        self.tracker.reset_project(&self.root, &self.project)?;
        info!("Cleared index for '{}'", self.project);
        Ok(())
    }

    pub fn stats(&self) -> anyhow::Result<IndexStatistics> {
        let index = self.index.read().expect("index lock poisoned");
        Ok(IndexStatistics {
            project: self.project.clone(),
            chunk_count: self.store.chunk_count()?,
            file_count: self.store.file_count()?,
            live_vectors: index.live_count(),
            deleted_slots: index.deleted_count(),
            dimension: index.dimension(),
            precision: index.precision(),
            db_size_bytes: self.store.db_size_bytes(),
            cache_entries: self.embedder.cache().size()?,
        })
    }
}

/// Fixed synonym groups used by the query expander.
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["auth", "authentication", "authorize", "login", "signin", "token"],
    &["security", "encrypt", "decrypt", "hash", "certificate"],
    &["config", "configuration", "settings", "options"],
    &["db", "database", "sql", "query", "repository"],
    &["http", "request", "response", "client", "endpoint"],
];

/// Expand a query with the synonyms of any matched group:
/// `original (syn1 OR syn2 …)`.
pub fn expand_query(query: &str) -> String {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut additions: Vec<&str> = Vec::new();
    for group in SYNONYM_GROUPS {
        if group.iter().any(|term| words.contains(term)) {
            for term in *group {
                if !words.contains(term) && !additions.contains(term) {
                    additions.push(term);
                }
            }
        }
    }

    if additions.is_empty() {
        query.to_string()
    } else {
        format!("{} ({})", query, additions.join(" OR "))
    }
}

/// Process-wide registry of per-project engines, created lazily on first
/// access. This is the only process-wide mutable state.
pub struct EngineRegistry {
    config: EngineConfig,
    data_dir: PathBuf,
    tracker: Arc<ChangeTracker>,
    embedder: Arc<EmbeddingService>,
    projects: DashMap<String, Arc<Indexer>>,
}

impl EngineRegistry {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let data_dir = constants::app_data_dir()?;
        let cache = Arc::new(EmbeddingCache::open(
            &data_dir.join(constants::EMBEDDING_CACHE_DB_NAME),
        )?);
        let embedder = Arc::new(EmbeddingService::new(&config, cache)?);
        Self::with_parts(config, data_dir, embedder)
    }

    /// Construct with explicit data directory and embedding service. The
    /// test suites use this to run against temp dirs and fake providers.
    pub fn with_parts(
        config: EngineConfig,
        data_dir: PathBuf,
        embedder: Arc<EmbeddingService>,
    ) -> anyhow::Result<Self> {
        let state_dir = data_dir.join(constants::STATE_DIR_NAME);
        std::fs::create_dir_all(&state_dir)?;
        let tracker = Arc::new(ChangeTracker::with_state_dir(&config, state_dir));
        Ok(Self {
            config,
            data_dir,
            tracker,
            embedder,
            projects: DashMap::new(),
        })
    }

    /// Fetch or lazily create the engine for one project.
    pub fn get_or_create(&self, project: &str, root: &Path) -> anyhow::Result<Arc<Indexer>> {
        if let Some(existing) = self.projects.get(project) {
            return Ok(existing.clone());
        }

        let db_path = self.data_dir.join(constants::chunk_store_db_name(project));
        let indexer = Arc::new(Indexer::open(
            project,
            root,
            &self.config,
            self.tracker.clone(),
            self.embedder.clone(),
            &db_path,
        )?);
        self.projects.insert(project.to_string(), indexer.clone());
        Ok(indexer)
    }

    /// Drop one project's engine from the registry (its store stays on disk).
    pub fn evict(&self, project: &str) {
        self.projects.remove(project);
    }

    pub fn project_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.projects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn tracker(&self) -> Arc<ChangeTracker> {
        self.tracker.clone()
    }

    pub fn embedder(&self) -> Arc<EmbeddingService> {
        self.embedder.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_query_auth_group() {
        let expanded = expand_query("login flow");
        assert!(expanded.starts_with("login flow ("));
        assert!(expanded.contains("authentication"));
        assert!(expanded.contains(" OR "));
        // The original term is not repeated inside the parentheses.
        assert!(!expanded.contains("(login"));
    }

    #[test]
    fn test_expand_query_no_match() {
        assert_eq!(expand_query("widget renderer"), "widget renderer");
    }

    #[test]
    fn test_expand_query_multiple_groups() {
        let expanded = expand_query("auth database");
        assert!(expanded.contains("authentication"));
        assert!(expanded.contains("sql"));
    }

    #[test]
    fn test_expand_query_word_boundaries() {
        // "dbx" is not the "db" term.
        assert_eq!(expand_query("dbx tool"), "dbx tool");
    }
}
