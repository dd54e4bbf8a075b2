//! Embedding caches.
//!
//! The persistent cache survives restarts and force reindexes: embeddings
//! are keyed by (content-hash, kind, model, project) in one shared SQLite
//! database, so unchanged content is never re-embedded — clearing a search
//! index must not touch it. A small in-memory LRU fronts repeated query
//! embeddings within a session.

use chrono::Utc;
use moka::sync::Cache;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// Key of one cached embedding. `project` is None for rows shared across
/// projects (queries).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content_hash: String,
    /// `document` or `query`.
    pub kind: String,
    pub model: String,
    pub project: Option<String>,
}

impl CacheKey {
    pub fn document(
        content_hash: impl Into<String>,
        model: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            kind: "document".to_string(),
            model: model.into(),
            project: Some(project.into()),
        }
    }

    pub fn query(content_hash: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            kind: "query".to_string(),
            model: model.into(),
            project: None,
        }
    }

    fn project_column(&self) -> &str {
        self.project.as_deref().unwrap_or("")
    }
}

/// Persistent embedding cache backed by `embedding_cache.db`.
///
/// Writers serialize through the connection mutex; `get` also refreshes the
/// LRU bookkeeping (`last_accessed`, `access_count`) used by age eviction.
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl EmbeddingCache {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::read_failure(parent, format!("cannot create cache directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS embedding_cache (
                id INTEGER PRIMARY KEY,
                content_hash TEXT NOT NULL,
                kind TEXT NOT NULL,
                model TEXT NOT NULL,
                project TEXT NOT NULL DEFAULT '',
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_cache_key
                ON embedding_cache(content_hash, kind, model, project);
            CREATE INDEX IF NOT EXISTS idx_cache_last_accessed
                ON embedding_cache(last_accessed);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open the shared cache in the application data directory.
    pub fn open_default() -> anyhow::Result<Self> {
        let path =
            crate::constants::app_data_dir()?.join(crate::constants::EMBEDDING_CACHE_DB_NAME);
        Ok(Self::open(&path)?)
    }

    /// Fetch a cached embedding, bumping its access bookkeeping on a hit.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, EngineError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM embedding_cache
                 WHERE content_hash = ?1 AND kind = ?2 AND model = ?3 AND project = ?4",
                params![key.content_hash, key.kind, key.model, key.project_column()],
                |row| row.get(0),
            )
            .optional()?;

        if blob.is_some() {
            conn.execute(
                "UPDATE embedding_cache
                 SET last_accessed = ?1, access_count = access_count + 1
                 WHERE content_hash = ?2 AND kind = ?3 AND model = ?4 AND project = ?5",
                params![
                    Utc::now().to_rfc3339(),
                    key.content_hash,
                    key.kind,
                    key.model,
                    key.project_column()
                ],
            )?;
        }

        Ok(blob)
    }

    /// Upsert one embedding.
    pub fn put(&self, key: &CacheKey, embedding: &[u8]) -> Result<(), EngineError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        Self::put_with(&conn, key, embedding)
    }

    /// Upsert many embeddings in one transaction.
    pub fn put_many(&self, entries: &[(CacheKey, Vec<u8>)]) -> Result<(), EngineError> {
        let mut conn = self.conn.lock().expect("cache mutex poisoned");
        let tx = conn.transaction()?;
        for (key, embedding) in entries {
            Self::put_with(&tx, key, embedding)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn put_with(conn: &Connection, key: &CacheKey, embedding: &[u8]) -> Result<(), EngineError> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO embedding_cache
                 (content_hash, kind, model, project, embedding, created_at, last_accessed, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0)
             ON CONFLICT(content_hash, kind, model, project)
             DO UPDATE SET embedding = excluded.embedding, last_accessed = excluded.last_accessed",
            params![
                key.content_hash,
                key.kind,
                key.model,
                key.project_column(),
                embedding,
                now
            ],
        )?;
        Ok(())
    }

    /// Number of cached embeddings.
    pub fn size(&self) -> Result<u64, EngineError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Total bytes of cached embedding blobs.
    pub fn size_bytes(&self) -> Result<u64, EngineError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(embedding)), 0) FROM embedding_cache",
            [],
            |r| r.get(0),
        )?;
        Ok(bytes as u64)
    }

    /// Delete rows not accessed within `days`. Returns the number deleted.
    pub fn evict_older_than(&self, days: i64) -> Result<usize, EngineError> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let deleted = conn.execute(
            "DELETE FROM embedding_cache WHERE last_accessed < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    /// Drop all rows belonging to one project.
    pub fn clear_project(&self, project: &str) -> Result<usize, EngineError> {
        let conn = self.conn.lock().expect("cache mutex poisoned");
        let deleted = conn.execute(
            "DELETE FROM embedding_cache WHERE project = ?1",
            params![project],
        )?;
        Ok(deleted)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// In-memory query-embedding cache.
///
/// Query reuse is very high in interactive sessions, so repeated searches
/// skip the endpoint round-trip entirely. Weigher-bounded LRU with
/// automatic eviction.
pub struct QueryCache {
    cache: Cache<String, Arc<Vec<u8>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    /// Default memory limit: 50 MB.
    pub fn new() -> Self {
        Self::with_memory_limit_mb(50)
    }

    pub fn with_memory_limit_mb(max_memory_mb: usize) -> Self {
        let max_weight = (max_memory_mb * 1024 * 1024) as u64;
        let cache = Cache::builder()
            .max_capacity(max_weight)
            .weigher(|key: &String, value: &Arc<Vec<u8>>| (key.len() + value.len()) as u32)
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, query: &str) -> Option<Vec<u8>> {
        if let Some(blob) = self.cache.get(query) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(blob.as_ref().clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, query: &str, blob: Vec<u8>) {
        self.cache.insert(query.to_string(), Arc::new(blob));
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            size: self.cache.entry_count() as usize,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Query cache statistics.
#[derive(Debug, Clone)]
pub struct QueryCacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl QueryCacheStats {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f32 / total as f32
    }
}
